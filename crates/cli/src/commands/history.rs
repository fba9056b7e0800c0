use concierge_core::config::{AppConfig, LoadOptions};
use concierge_core::domain::session::SessionId;
use concierge_db::{SessionStore, SqlSessionStore};

use crate::commands::migrate::open_session_store;
use crate::commands::CommandResult;

/// Prints every persisted record of a session, oldest first, as JSON.
pub fn run(session: &str) -> CommandResult {
    let session = session.trim();
    if session.is_empty() {
        return CommandResult::failure(
            "history",
            "invalid_argument",
            "session id must not be blank",
            2,
        );
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "history",
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
                "history",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let session_id = SessionId::new(session);
    runtime.block_on(async {
        let pool = match open_session_store(&config.database).await {
            Ok(pool) => pool,
            Err((error_class, message, exit_code)) => {
                return CommandResult::session_failure(
                    "history",
                    &session_id,
                    error_class,
                    message,
                    exit_code,
                );
            }
        };

        let records = SqlSessionStore::new(pool.clone()).read_all(&session_id).await;
        pool.close().await;

        let records = match records {
            Ok(records) => records,
            Err(error) => {
                return CommandResult::session_failure(
                    "history",
                    &session_id,
                    "session_unavailable",
                    error.to_string(),
                    7,
                );
            }
        };
        if records.is_empty() {
            return CommandResult::session_failure(
                "history",
                &session_id,
                "session_not_found",
                "no records stored for this session",
                8,
            );
        }

        match serde_json::to_string_pretty(&records) {
            Ok(rendered) => CommandResult { exit_code: 0, output: rendered },
            Err(error) => CommandResult::session_failure(
                "history",
                &session_id,
                "serialization",
                error.to_string(),
                9,
            ),
        }
    })
}
