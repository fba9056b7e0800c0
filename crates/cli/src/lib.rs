pub mod commands;
pub mod telemetry;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "concierge",
    about = "Concierge mortgage appointment assistant",
    long_about = "Chat with the intent and scheduler agents, inspect stored sessions, apply migrations, and check runtime readiness.",
    after_help = "Examples:\n  concierge\n  concierge chat --session session-42\n  concierge history --session session-42\n  concierge doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start or resume a conversation on this terminal (default command)")]
    Chat {
        #[arg(long, help = "Session id to resume; defaults to the configured id or a new one")]
        session: Option<String>,
    },
    #[command(about = "Print the stored records of a session as JSON")]
    History {
        #[arg(long, help = "Session id to read")]
        session: String,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model endpoint readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Command::Chat { session: None }) {
        Command::Chat { session } => {
            // stdout belongs to the dialogue; the closing status goes to stderr.
            let result = commands::chat::run(session);
            eprintln!("{}", result.output);
            return ExitCode::from(result.exit_code);
        }
        Command::History { session } => commands::history::run(&session),
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
