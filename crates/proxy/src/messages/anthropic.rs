use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body accepted on `POST /v1/messages`.
///
/// This is the Anthropic Messages API request shape as clients such as
/// Claude Code send it. Compared to the official API surface, `model` and
/// `max_tokens` are optional here: the proxy fills them from its configured
/// defaults before anything goes upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    /// Requested model id. When absent, the model selector picks one from
    /// the configured defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// The conversation. Roles beyond `user`/`assistant` are accepted and
    /// normalized during translation.
    pub messages: Vec<Message>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// System prompt, either a plain string or a list of text blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// When true, the response is delivered as Server-Sent Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Client-private routing hint. Never forwarded upstream: it only
    /// steers model selection towards the reasoning default.
    #[serde(default, skip_serializing)]
    pub thinking: Option<ThinkingHint>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// The `thinking` request field.
///
/// Clients send either a bare boolean or the richer object form with a
/// token budget; both collapse to an on/off routing hint here.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ThinkingHint {
    Flag(bool),
    Config {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        #[allow(dead_code)]
        budget_tokens: Option<u32>,
    },
}

impl ThinkingHint {
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Flag(enabled) => *enabled,
            Self::Config { kind, .. } => kind == "enabled",
        }
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Message content: either a bare string or a list of typed blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A typed content block.
///
/// Used both in requests (where `tool_result` carries tool output back to
/// the model) and in responses (where `tool_use` and `thinking` appear).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "thinking")]
    Thinking { thinking: String },

    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultContent>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Tool result payload: a plain string or arbitrary blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<Value>),
}

/// System prompt: a plain string or a list of text blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

/// A block inside a structured system prompt.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum SystemBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

/// Tool definition in Anthropic format.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Tool choice configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// Let the model decide whether to use tools.
    Auto,
    /// Force the model to use any available tool.
    Any,
    /// Disallow tool use.
    None,
    /// Force a specific tool.
    Tool { name: String },
}

/// Response body for `POST /v1/messages`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatResponse {
    pub id: String,

    /// Always `"message"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Always `assistant`.
    pub role: Role,

    pub model: String,

    pub content: Vec<ContentBlock>,

    pub stop_reason: Option<StopReason>,

    pub stop_sequence: Option<String>,

    pub usage: Usage,

    /// Non-fatal notes about transformations the proxy applied, such as the
    /// empty-response placeholder or repaired tool arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndTurn => f.write_str("end_turn"),
            Self::MaxTokens => f.write_str("max_tokens"),
            Self::StopSequence => f.write_str("stop_sequence"),
            Self::ToolUse => f.write_str("tool_use"),
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

/// Streaming events emitted to the downstream client.
///
/// The SSE writer pairs each event with an `event:` line carrying
/// [`StreamEvent::name`], matching the Anthropic streaming framing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStart },

    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "content_block_start")]
    ContentBlockStart { index: u32, content_block: ContentBlock },

    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: u32, delta: ContentDelta },

    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: u32 },

    #[serde(rename = "message_delta")]
    MessageDelta { delta: MessageDelta, usage: Usage },

    #[serde(rename = "message_stop")]
    MessageStop,

    #[serde(rename = "error")]
    Error { error: ErrorDetail },
}

impl StreamEvent {
    /// The SSE `event:` name for this payload.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::Ping => "ping",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
            Self::Error { .. } => "error",
        }
    }
}

/// Initial message metadata in a `message_start` event.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageStart {
    pub id: String,

    /// Always `"message"`.
    #[serde(rename = "type")]
    pub kind: String,

    pub role: Role,

    /// Empty at start; populated through content block events.
    pub content: Vec<ContentBlock>,

    pub model: String,

    pub usage: Usage,
}

/// Incremental update to a content block.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ContentDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },

    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

/// Final message metadata in a `message_delta` event.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

/// Error payload for both the SSE `error` event and the JSON envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}
