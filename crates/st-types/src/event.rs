//! Decoded project-bus events.
//!
//! These are the normalised forms handed to the dispatcher; the raw wire
//! shapes (nested vs flattened tool payloads, optional fields, numeric ids)
//! are resolved by the decoder before an event gets here.

use serde::{Deserialize, Serialize};

use crate::{BackendErrorMeta, ChatMessage, MessageId, TaskId, TokenUsage};

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A message persisted by any participant of the project.
    NewMessage(ChatMessage),
    MessageDeleted { message_id: MessageId },
    Heartbeat,
    CommandApprovalRequest(ApprovalRequest),
    /// Anything scoped to one AI task.
    Task {
        task_id: TaskId,
        /// Model and sender label as carried by the event, empty when absent.
        model: String,
        sender_label: String,
        event: TaskEvent,
    },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::Heartbeat => "heartbeat",
            Self::CommandApprovalRequest(_) => "command_approval_request",
            Self::Task { event, .. } => event.kind(),
        }
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Task { task_id, .. } => Some(task_id),
            Self::CommandApprovalRequest(req) => Some(&req.task_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Started,
    Content(String),
    Thinking(String),
    /// Opaque context-window usage snapshot owned by the UI.
    Context(serde_json::Value),
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Option<serde_json::Value>,
    },
    ToolResult {
        tool_call_id: String,
        result: Option<String>,
        duration_ms: Option<u64>,
    },
    ToolError {
        tool_call_id: String,
        error: Option<String>,
        duration_ms: Option<u64>,
    },
    Usage(TokenUsage),
    Truncated,
    /// History was compressed server-side; carries the summary text.
    Summary(String),
    Done {
        message_id: Option<MessageId>,
    },
    Error {
        error: String,
        error_meta: Option<BackendErrorMeta>,
    },
    Cancelled,
}

impl TaskEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started => "task_started",
            Self::Content(_) => "content",
            Self::Thinking(_) => "thinking",
            Self::Context(_) => "context",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolError { .. } => "tool_error",
            Self::Usage(_) => "usage",
            Self::Truncated => "truncated",
            Self::Summary(_) => "summary",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. } | Self::Cancelled)
    }
}

/// A tool call that needs a human to approve the shell command it wants to
/// run. Passed through untouched, with the raw payload attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub task_id: TaskId,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub tool_call_id: String,
    #[serde(skip)]
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_events() {
        assert!(TaskEvent::Cancelled.is_terminal());
        assert!(TaskEvent::Done { message_id: None }.is_terminal());
        assert!(!TaskEvent::Truncated.is_terminal());
        assert!(!TaskEvent::Content("x".into()).is_terminal());
    }

    #[test]
    fn kind_matches_wire_names() {
        let ev = StreamEvent::Task {
            task_id: TaskId::from("1"),
            model: String::new(),
            sender_label: String::new(),
            event: TaskEvent::ToolCallStart {
                id: "c1".into(),
                name: "search".into(),
            },
        };
        assert_eq!(ev.kind(), "tool_call_start");
        assert_eq!(ev.task_id().map(TaskId::as_str), Some("1"));
        assert_eq!(StreamEvent::Heartbeat.task_id(), None);
    }
}
