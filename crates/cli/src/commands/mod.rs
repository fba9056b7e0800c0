pub mod chat;
pub mod config;
pub mod doctor;
pub mod history;
pub mod migrate;

use concierge_core::domain::session::SessionId;
use serde::Serialize;

/// What a command hands back to `main`: the exit code and the text for stderr.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// Closing JSON line of a command. Session-bound commands name their session.
#[derive(Debug, Serialize)]
struct CommandOutcome<'a> {
    command: &'a str,
    status: &'a str,
    error_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::report(command, None, None, message.into(), 0)
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::report(command, None, Some(error_class), message.into(), exit_code)
    }

    pub fn session_success(
        command: &str,
        session_id: &SessionId,
        message: impl Into<String>,
    ) -> Self {
        Self::report(command, Some(session_id), None, message.into(), 0)
    }

    pub fn session_failure(
        command: &str,
        session_id: &SessionId,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::report(command, Some(session_id), Some(error_class), message.into(), exit_code)
    }

    fn report(
        command: &str,
        session_id: Option<&SessionId>,
        error_class: Option<&str>,
        message: String,
        exit_code: u8,
    ) -> Self {
        let outcome = CommandOutcome {
            command,
            status: if error_class.is_some() { "error" } else { "ok" },
            error_class,
            session_id: session_id.map(SessionId::as_str),
            message,
        };
        let output = serde_json::to_string(&outcome).unwrap_or_else(|error| {
            format!(
                r#"{{"command":"{command}","status":"error","error_class":"serialization","message":{:?}}}"#,
                error.to_string()
            )
        });
        Self { exit_code, output }
    }
}
