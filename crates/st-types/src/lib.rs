//! Shared wire and domain types for studio-sync.
//!
//! Everything that crosses a crate boundary lives here: identifiers, chat
//! messages, tool invocations, token usage, error metadata and the decoded
//! stream events produced by the project event bus.

pub mod event;

pub use event::{ApprovalRequest, StreamEvent, TaskEvent};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

// ── Identifiers ──

/// Opaque task identifier.
///
/// The backend emits numeric ids, but nothing here relies on that; numbers
/// and strings are both accepted and normalised to their decimal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for TaskId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Uint(u64),
            Text(String),
        }

        let id = match Raw::deserialize(deserializer)? {
            Raw::Int(n) => n.to_string(),
            Raw::Uint(n) => n.to_string(),
            Raw::Text(s) => s,
        };
        if id.is_empty() {
            return Err(serde::de::Error::custom("empty task id"));
        }
        Ok(Self(id))
    }
}

/// Chat message identifier: server-assigned once persisted, a random
/// client-side placeholder before that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Server(i64),
    Local(Uuid),
}

impl MessageId {
    pub fn local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    /// Map a wire message id to a server id. Zero and negative values are
    /// "not persisted" sentinels and yield `None`.
    pub fn from_wire(id: Option<i64>) -> Option<Self> {
        id.filter(|n| *n > 0).map(Self::Server)
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(n) => write!(f, "{n}"),
            Self::Local(u) => write!(f, "local-{u}"),
        }
    }
}

// ── Messages ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

/// One entry in the shared, ordered chat message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(rename = "sender_name", default, deserialize_with = "null_as_default")]
    pub sender_label: String,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub thinking_content: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_calls: Vec<ToolInvocation>,
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
    /// Optimistic entry inserted locally, awaiting its server echo.
    #[serde(rename = "_pending", default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
}

impl ChatMessage {
    /// Locally authored user message shown before the server confirms it.
    pub fn pending_user(content: impl Into<String>, sender_label: impl Into<String>) -> Self {
        Self {
            id: MessageId::local(),
            role: Role::User,
            content: content.into(),
            sender_label: sender_label.into(),
            model_used: None,
            thinking_content: None,
            tool_calls: Vec::new(),
            token_usage: None,
            created_at: Utc::now(),
            pending: true,
        }
    }
}

// ── Tool invocations ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Preparing,
    Calling,
    /// Persisted tool calls omit the status field.
    #[default]
    Done,
    Error,
}

impl ToolStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub arguments: Option<serde_json::Value>,
    #[serde(default)]
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: ToolStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: None,
            status,
            result: None,
            duration_ms: None,
        }
    }
}

/// One display-order slot of a streaming task: a run of prose, or a
/// reference (by tool call id) into the task's tool invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Content { text: String },
    Tool { tool_call_id: String },
}

// ── Token usage ──

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completion_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reasoning_tokens: u64,
    /// Provider-specific counters we do not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── Error metadata ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    RateLimit,
    ContextOverflow,
    AuthError,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::ContextOverflow => "context_overflow",
            Self::AuthError => "auth_error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the error is worth recording against the model's capabilities.
    pub fn updates_capabilities(self) -> bool {
        matches!(self, Self::RateLimit | Self::ContextOverflow)
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error fields as sent by the backend on an `error` event.
/// Every field is optional; whatever is present overrides text parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendErrorMeta {
    #[serde(default)]
    pub error_type: Option<ErrorType>,
    #[serde(default)]
    pub rate_limit: Option<String>,
    #[serde(default)]
    pub rate_limit_count: Option<u64>,
    #[serde(default)]
    pub rate_limit_seconds: Option<u64>,
    #[serde(default)]
    pub wait_seconds: Option<u64>,
    #[serde(default)]
    pub max_context_tokens: Option<u64>,
    #[serde(default)]
    pub requested_tokens: Option<u64>,
    #[serde(default)]
    pub status_code: Option<u16>,
}

/// Classified error. Derived on demand, never stored on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMeta {
    pub error_type: ErrorType,
    /// Display form of the rate limit, e.g. "10 per 60s".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub summary: String,
}

// ── Task status (REST) ──

/// Response of `GET /tasks/{id}/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub has_content: bool,
    #[serde(default)]
    pub has_error: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result_message_id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl TaskStatus {
    pub fn is_running(&self) -> bool {
        matches!(self.status.as_str(), "pending" | "running")
    }
}

// ── serde helpers ──

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts RFC 3339 and zone-less ISO timestamps (treated as UTC). Anything
/// unparseable becomes "now" rather than rejecting the whole message.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(Utc::now());
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    Ok(Utc::now())
}
