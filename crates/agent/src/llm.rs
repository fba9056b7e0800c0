use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use concierge_core::config::{AgentModelConfig, LlmConfig, LlmProvider};
use eventsource_stream::Eventsource;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl From<&AgentModelConfig> for ModelSettings {
    fn from(config: &AgentModelConfig) -> Self {
        Self { temperature: config.temperature, max_output_tokens: config.max_output_tokens }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text as streamed by the model.
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(ChatRole::Assistant, content)
    }

    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content, tool_calls, tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub settings: ModelSettings,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelEvent {
    TextDelta(String),
    ToolCall(ToolCall),
}

pub type ModelStream = BoxStream<'static, Result<ModelEvent, LlmError>>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model stream interrupted: {0}")]
    Stream(String),
    #[error("could not decode model chunk: {0}")]
    Decode(String),
    #[error("model client misconfigured: {0}")]
    Configuration(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_name(&self) -> &str;

    /// Starts a streamed completion. The returned stream ends when the model
    /// finishes; dropping it cancels the underlying request.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ModelStream, LlmError>;
}

enum Credential {
    None,
    Bearer(SecretString),
    ApiKeyHeader(SecretString),
}

/// Chat Completions client for Azure OpenAI, OpenAI and Ollama's
/// OpenAI-compatible endpoint.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    credential: Credential,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let endpoint = chat_completions_url(config)?;
        let credential = match (config.provider, config.api_key.clone()) {
            (LlmProvider::AzureOpenAi, Some(key)) => Credential::ApiKeyHeader(key),
            (LlmProvider::OpenAi, Some(key)) => Credential::Bearer(key),
            (LlmProvider::Ollama, Some(key)) => Credential::Bearer(key),
            (LlmProvider::Ollama, None) => Credential::None,
            (provider, None) => {
                return Err(LlmError::Configuration(format!(
                    "provider {provider:?} requires an api key"
                )))
            }
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { http, endpoint, credential, model: config.effective_model().to_string() })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Resolves the chat completions URL for the configured provider.
pub fn chat_completions_url(config: &LlmConfig) -> Result<String, LlmError> {
    let base = config
        .effective_base_url()
        .map(|url| url.trim_end_matches('/'))
        .ok_or_else(|| LlmError::Configuration("no model endpoint configured".to_string()))?;

    Ok(match config.provider {
        LlmProvider::AzureOpenAi => format!(
            "{base}/openai/deployments/{deployment}/chat/completions?api-version={version}",
            deployment = config.effective_model(),
            version = config.api_version,
        ),
        LlmProvider::OpenAi => format!("{base}/chat/completions"),
        LlmProvider::Ollama => format!("{base}/v1/chat/completions"),
    })
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ModelStream, LlmError> {
        let body = WireRequest::new(&self.model, &request);
        let mut builder = self.http.post(&self.endpoint).json(&body);
        builder = match &self.credential {
            Credential::None => builder,
            Credential::Bearer(key) => builder.bearer_auth(key.expose_secret()),
            Credential::ApiKeyHeader(key) => builder.header("api-key", key.expose_secret()),
        };

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<ModelEvent, LlmError>>(64);
        tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();
            let mut parser = ChunkParser::default();

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(error) => {
                        let _ = tx.send(Err(LlmError::Stream(error.to_string()))).await;
                        return;
                    }
                };
                let parsed = match parser.push(&event.data) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        let _ = tx.send(Err(error)).await;
                        return;
                    }
                };
                for model_event in parsed {
                    if tx.send(Ok(model_event)).await.is_err() {
                        return;
                    }
                }
                if parser.is_done() {
                    break;
                }
            }

            for model_event in parser.finish() {
                if tx.send(Ok(model_event)).await.is_err() {
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    temperature: f32,
    max_tokens: u32,
}

impl<'a> WireRequest<'a> {
    fn new(model: &'a str, request: &'a ChatRequest) -> Self {
        Self {
            model,
            stream: true,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: request
                .tools
                .iter()
                .map(|spec| WireTool {
                    kind: "function",
                    function: WireFunction {
                        name: &spec.name,
                        description: &spec.description,
                        parameters: &spec.parameters,
                    },
                })
                .collect(),
            temperature: request.settings.temperature,
            max_tokens: request.settings.max_output_tokens,
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        Self {
            role: message.role.as_str(),
            content: message.content.as_deref(),
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: &call.id,
                    kind: "function",
                    function: WireCalledFunction { name: &call.name, arguments: &call.arguments },
                })
                .collect(),
            tool_call_id: message.tool_call_id.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireCalledFunction<'a>,
}

#[derive(Serialize)]
struct WireCalledFunction<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Turns SSE `data:` payloads into model events. Text is forwarded as it
/// arrives; tool calls are assembled by index and released once the choice
/// finishes or the stream ends.
#[derive(Default)]
pub struct ChunkParser {
    pending: BTreeMap<usize, PendingToolCall>,
    done: bool,
}

impl ChunkParser {
    pub fn push(&mut self, data: &str) -> Result<Vec<ModelEvent>, LlmError> {
        let data = data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(self.drain());
        }

        let chunk: StreamChunk =
            serde_json::from_str(data).map_err(|error| LlmError::Decode(error.to_string()))?;
        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|content| !content.is_empty()) {
                events.push(ModelEvent::TextDelta(content));
            }
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let entry = self.pending.entry(delta.index).or_default();
                if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                    entry.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name.filter(|name| !name.is_empty()) {
                        entry.name = name;
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                events.extend(self.drain());
            }
        }
        Ok(events)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn finish(mut self) -> Vec<ModelEvent> {
        self.drain()
    }

    fn drain(&mut self) -> Vec<ModelEvent> {
        std::mem::take(&mut self.pending)
            .into_values()
            .filter(|pending| !pending.name.is_empty())
            .map(|pending| {
                ModelEvent::ToolCall(ToolCall {
                    id: pending.id,
                    name: pending.name,
                    arguments: pending.arguments,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::config::{AppConfig, LlmProvider};
    use serde_json::json;

    use super::{
        chat_completions_url, ChatMessage, ChatRequest, ChunkParser, LlmError, ModelEvent,
        ModelSettings, OpenAiCompatibleClient, ToolCall, ToolSpec, WireRequest,
    };

    #[test]
    fn text_deltas_are_forwarded_immediately() {
        let mut parser = ChunkParser::default();
        let events = parser
            .push(r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#)
            .expect("chunk should parse");

        assert_eq!(events, vec![ModelEvent::TextDelta("Hello".to_string())]);
        assert!(!parser.is_done());
    }

    #[test]
    fn tool_call_fragments_are_joined_by_index() {
        let mut parser = ChunkParser::default();
        let first = parser
            .push(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"transfer_to_scheduler","arguments":""}}]}}]}"#,
            )
            .expect("first fragment");
        let second = parser
            .push(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{}"}}]}}]}"#)
            .expect("second fragment");
        let finished = parser
            .push(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#)
            .expect("finish chunk");

        assert!(first.is_empty());
        assert!(second.is_empty());
        assert_eq!(
            finished,
            vec![ModelEvent::ToolCall(ToolCall {
                id: "call_1".to_string(),
                name: "transfer_to_scheduler".to_string(),
                arguments: "{}".to_string(),
            })]
        );
    }

    #[test]
    fn done_marker_flushes_pending_calls() {
        let mut parser = ChunkParser::default();
        parser
            .push(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"finish_conversation_tool","arguments":"{}"}},{"index":0,"id":"a","function":{"name":"select_timeslot_tool","arguments":"{\"timeslot\":\"2023-10-01 10:00\"}"}}]}}]}"#,
            )
            .expect("fragment");
        let events = parser.push("[DONE]").expect("done marker");

        assert!(parser.is_done());
        let names: Vec<_> = events
            .iter()
            .map(|event| match event {
                ModelEvent::ToolCall(call) => call.name.as_str(),
                ModelEvent::TextDelta(_) => "text",
            })
            .collect();
        assert_eq!(names, vec!["select_timeslot_tool", "finish_conversation_tool"]);
    }

    #[test]
    fn chunks_without_choices_are_ignored() {
        let mut parser = ChunkParser::default();
        let events =
            parser.push(r#"{"choices":[],"prompt_filter_results":[]}"#).expect("azure preamble");
        assert!(events.is_empty());
    }

    #[test]
    fn garbage_chunk_is_a_decode_error() {
        let mut parser = ChunkParser::default();
        assert!(matches!(parser.push("not json"), Err(LlmError::Decode(_))));
    }

    #[test]
    fn endpoints_follow_provider_conventions() {
        let mut config = AppConfig::default().llm;
        assert_eq!(
            chat_completions_url(&config).expect("ollama url"),
            "http://localhost:11434/v1/chat/completions"
        );

        config.provider = LlmProvider::OpenAi;
        assert_eq!(
            chat_completions_url(&config).expect("openai url"),
            "https://api.openai.com/v1/chat/completions"
        );

        config.provider = LlmProvider::AzureOpenAi;
        config.base_url = Some("https://contoso.openai.azure.com/".to_string());
        config.model = Some("gpt-4o-deploy".to_string());
        assert_eq!(
            chat_completions_url(&config).expect("azure url"),
            "https://contoso.openai.azure.com/openai/deployments/gpt-4o-deploy/chat/completions?api-version=2024-12-01-preview"
        );

        config.base_url = None;
        assert!(matches!(chat_completions_url(&config), Err(LlmError::Configuration(_))));
    }

    #[test]
    fn hosted_providers_need_a_key() {
        let mut config = AppConfig::default().llm;
        config.provider = LlmProvider::OpenAi;
        assert!(matches!(
            OpenAiCompatibleClient::from_config(&config),
            Err(LlmError::Configuration(_))
        ));
    }

    #[test]
    fn request_body_carries_tools_and_settings() {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system("be brief"),
                ChatMessage::assistant_tool_calls(
                    None,
                    vec![ToolCall {
                        id: "call_1".to_string(),
                        name: "finish_conversation_tool".to_string(),
                        arguments: "{}".to_string(),
                    }],
                ),
                ChatMessage::tool_result("call_1", "done"),
            ],
            tools: vec![ToolSpec {
                name: "finish_conversation_tool".to_string(),
                description: "Finishes the conversation".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }],
            settings: ModelSettings { temperature: 0.1, max_output_tokens: 100 },
        };

        let body = serde_json::to_value(WireRequest::new("gpt-4o", &request)).expect("serialize");

        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["max_tokens"], json!(100));
        assert_eq!(body["tools"][0]["type"], json!("function"));
        assert_eq!(body["messages"][1]["tool_calls"][0]["function"]["name"], json!("finish_conversation_tool"));
        assert_eq!(body["messages"][2]["tool_call_id"], json!("call_1"));
        assert!(body["messages"][0].get("tool_calls").is_none());
    }
}
