use concierge_core::config::{AppConfig, DatabaseConfig, LoadOptions};
use concierge_db::{connect_with_config, migrations, DbPool};

use crate::commands::CommandResult;

/// Why the session store could not be opened: error class, message, exit code.
pub(crate) type StoreFailure = (&'static str, String, u8);

/// Connects to the session store and brings its schema up to date.
pub(crate) async fn open_session_store(
    database: &DatabaseConfig,
) -> Result<DbPool, StoreFailure> {
    let pool = connect_with_config(database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4))?;
    if let Err(error) = migrations::run_pending(&pool).await {
        pool.close().await;
        return Err(("migration", error.to_string(), 5));
    }
    Ok(pool)
}

/// Prepares the session store ahead of the first chat.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let prepared = runtime.block_on(async {
        let pool = open_session_store(&config.database).await?;
        pool.close().await;
        Ok::<(), StoreFailure>(())
    });

    match prepared {
        Ok(()) => CommandResult::success(
            "migrate",
            format!(
                "session store `{}` is at schema version {}",
                config.database.url,
                migrations::latest_version()
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
