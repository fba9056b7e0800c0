use std::io::Write;
use std::sync::Arc;

use concierge_agent::{default_registry, ConversationSink, HandoffLoop, LoopSettings, OpenAiCompatibleClient};
use concierge_core::audit::TracingAuditSink;
use concierge_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use concierge_core::domain::context::{ConversationStatus, SharedContext};
use concierge_core::domain::session::SessionId;
use concierge_core::errors::ConversationError;
use concierge_core::flows::LoopState;
use concierge_db::SqlSessionStore;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::commands::migrate::open_session_store;
use crate::commands::CommandResult;
use crate::telemetry;

pub const GREETING: &str = "Hi, how can I help you today?";
pub const ANSWER_PROMPT: &str = "Answer: ";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversationEnd {
    Completed,
    InputClosed,
    Interrupted,
    /// Standard input could not be read, e.g. it was not valid UTF-8.
    InputFailed(String),
}

impl ConversationEnd {
    fn describe(&self) -> &'static str {
        match self {
            Self::Completed => "conversation completed",
            Self::InputClosed => "input closed before the conversation completed",
            Self::Interrupted => "interrupted before the conversation completed",
            Self::InputFailed(_) => "input could not be read",
        }
    }
}

/// Streams dialogue straight to the terminal.
pub struct TerminalSink<'a> {
    out: &'a mut dyn Write,
}

impl<'a> TerminalSink<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self { out }
    }
}

impl ConversationSink for TerminalSink<'_> {
    fn dialogue(&mut self, text: &str) {
        let _ = write!(self.out, "{text}");
        let _ = self.out.flush();
    }

    fn handoff(&mut self, agent_name: &str) {
        let _ = writeln!(self.out, "\nHanded off to agent: {agent_name}\n");
        let _ = self.out.flush();
    }

    fn turn_finished(&mut self) {
        let _ = writeln!(self.out);
    }
}

pub fn run(session: Option<String>) -> CommandResult {
    let options = LoadOptions {
        overrides: ConfigOverrides { session_id: session, ..ConfigOverrides::default() },
        ..LoadOptions::default()
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    if let Err(error) = telemetry::init_logging(&config.logging) {
        eprintln!("{error:#}");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    runtime.block_on(chat(config))
}

async fn chat(config: AppConfig) -> CommandResult {
    let session_id = config
        .conversation
        .session_id
        .clone()
        .map(SessionId::new)
        .unwrap_or_else(SessionId::generate);

    let pool = match open_session_store(&config.database).await {
        Ok(pool) => pool,
        Err((error_class, message, exit_code)) => {
            return CommandResult::session_failure(
                "chat",
                &session_id,
                error_class,
                message,
                exit_code,
            );
        }
    };

    let mut conversation = match open_conversation(&config, session_id.clone(), pool.clone()) {
        Ok(conversation) => conversation,
        Err((error_class, message)) => {
            pool.close().await;
            return CommandResult::session_failure("chat", &session_id, error_class, message, 6);
        }
    };

    let outcome = match conversation.restore().await {
        Ok(_) if conversation.context().status() == ConversationStatus::Completed => {
            pool.close().await;
            return CommandResult::session_success(
                "chat",
                &session_id,
                "conversation already completed",
            );
        }
        Ok(resumed) => {
            tracing::info!(
                event_name = "chat.session_started",
                session_id = %session_id,
                resumed,
                agent = %conversation.active_agent(),
                "chat session started"
            );
            let input = BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            converse(&mut conversation, input, &mut stdout).await
        }
        Err(error) => Err(error),
    };
    pool.close().await;

    match outcome {
        Ok(ConversationEnd::InputFailed(reason)) => CommandResult::session_failure(
            "chat",
            &session_id,
            "input_unavailable",
            format!("input could not be read: {reason}"),
            8,
        ),
        Ok(end) => CommandResult::session_success("chat", &session_id, end.describe()),
        Err(error) => CommandResult::session_failure(
            "chat",
            &session_id,
            error.error_class(),
            error.operator_message(),
            7,
        ),
    }
}

fn open_conversation(
    config: &AppConfig,
    session_id: SessionId,
    pool: concierge_db::DbPool,
) -> Result<HandoffLoop, (&'static str, String)> {
    let client = OpenAiCompatibleClient::from_config(&config.llm)
        .map_err(|error| ("llm_configuration", error.to_string()))?;
    let registry = default_registry(Arc::new(client), &config.agents)
        .map_err(|error| ("agent_wiring", error.to_string()))?;

    HandoffLoop::new(
        Arc::new(registry),
        Arc::new(SqlSessionStore::new(pool)),
        Arc::new(TracingAuditSink),
        session_id,
        SharedContext::with_timeslots(config.conversation.available_timeslots.clone()),
        LoopSettings::from(&config.conversation),
    )
    .map_err(|error| ("agent_wiring", error.to_string()))
}

/// Prompts for answers until the conversation completes, the input closes or
/// the operator presses Ctrl-C.
pub async fn converse<R>(
    conversation: &mut HandoffLoop,
    input: R,
    out: &mut dyn Write,
) -> Result<ConversationEnd, ConversationError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let _ = write!(out, "\n{GREETING}\n\n");

    loop {
        let _ = write!(out, "{ANSWER_PROMPT}");
        let _ = out.flush();

        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                let _ = writeln!(out);
                return Ok(ConversationEnd::Interrupted);
            }
        };
        let answer = match line {
            Ok(Some(answer)) => answer,
            Ok(None) => {
                let _ = writeln!(out);
                return Ok(ConversationEnd::InputClosed);
            }
            Err(error) => {
                let _ = writeln!(out);
                tracing::warn!(
                    event_name = "chat.input_failed",
                    session_id = %conversation.session_id(),
                    error = %error,
                    "failed to read operator input"
                );
                return Ok(ConversationEnd::InputFailed(error.to_string()));
            }
        };
        let answer = answer.trim();
        if answer.is_empty() {
            continue;
        }

        let _ = writeln!(out);
        let submitted = {
            let mut sink = TerminalSink::new(&mut *out);
            tokio::select! {
                state = conversation.submit(answer, &mut sink) => Some(state?),
                _ = tokio::signal::ctrl_c() => None,
            }
        };
        let Some(state) = submitted else {
            let _ = writeln!(out);
            return Ok(ConversationEnd::Interrupted);
        };
        if state == LoopState::Completed {
            return Ok(ConversationEnd::Completed);
        }
        let _ = writeln!(out);
    }
}
