//! Record payload -> [`StreamEvent`].
//!
//! Decoding never fails loudly: malformed JSON, unknown `type` values and
//! task-scoped events without a task id all yield `None` and a trace log, so
//! one bad record cannot take the stream down.

use serde::Deserialize;
use serde_json::Value;

use st_types::{
    ApprovalRequest, BackendErrorMeta, ChatMessage, MessageId, StreamEvent, TaskEvent, TaskId,
    TokenUsage,
};

/// Content of an `error` event that carries no text.
pub const DEFAULT_ERROR_TEXT: &str = "AI service error";

/// Fields shared by every task-scoped record.
#[derive(Debug, Default, Deserialize)]
struct Header {
    #[serde(default)]
    task_id: Option<TaskId>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    sender_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Wire {
    NewMessage {
        #[serde(default)]
        message: Option<Value>,
    },
    MessageDeleted {
        #[serde(default)]
        message_id: Option<MessageId>,
    },
    Heartbeat,
    CommandApprovalRequest {
        #[serde(default)]
        command: Option<String>,
        #[serde(default)]
        tool_call_id: Option<String>,
    },
    TaskStarted,
    Content {
        #[serde(default)]
        content: Option<String>,
    },
    Thinking {
        #[serde(default)]
        content: Option<String>,
    },
    Context {
        #[serde(default)]
        context: Value,
    },
    ToolCallStart(ToolFields),
    ToolCall(ToolFields),
    ToolResult {
        #[serde(default)]
        tool_call_id: Option<String>,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        duration_ms: Option<f64>,
    },
    ToolError {
        #[serde(default)]
        tool_call_id: Option<String>,
        #[serde(default)]
        error: Option<Value>,
        #[serde(default)]
        duration_ms: Option<f64>,
    },
    Usage {
        #[serde(default)]
        usage: Option<Value>,
    },
    Truncated,
    Summary {
        #[serde(default)]
        summary: Option<String>,
    },
    Done {
        #[serde(default)]
        message_id: Option<i64>,
    },
    Error {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        error_meta: Option<Value>,
    },
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// Tool payloads arrive either nested under `tool_call` or flattened onto
/// the event itself; nested values win.
#[derive(Debug, Deserialize)]
struct ToolFields {
    #[serde(default)]
    tool_call: Option<ToolBody>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

impl ToolFields {
    fn resolve(self) -> (String, String, Option<Value>) {
        let body = self.tool_call.unwrap_or_default();
        let id = non_empty(body.id)
            .or_else(|| non_empty(self.id))
            .or_else(|| non_empty(self.tool_call_id))
            .unwrap_or_default();
        let name = non_empty(body.name)
            .or_else(|| non_empty(self.name))
            .unwrap_or_default();
        let arguments = body
            .arguments
            .filter(|v| !v.is_null())
            .or(self.arguments.filter(|v| !v.is_null()));
        (id, name, arguments)
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

/// Tool results are usually strings; anything else is kept as compact JSON.
fn text_of(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn whole_millis(ms: Option<f64>) -> Option<u64> {
    ms.filter(|d| *d >= 0.0).map(|d| d.round() as u64)
}

#[derive(Debug, Clone, Default)]
pub struct EventDecoder {
    fallback_task: Option<TaskId>,
}

impl EventDecoder {
    /// Decoder for the project bus, where every task event names its task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder for a single-task stream, whose events omit `task_id`.
    pub fn for_task(task_id: TaskId) -> Self {
        Self {
            fallback_task: Some(task_id),
        }
    }

    pub fn decode(&self, payload: &str) -> Option<StreamEvent> {
        let value: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::trace!(error = %e, "dropping malformed record");
                return None;
            }
        };
        if !value.is_object() {
            tracing::trace!("dropping non-object record");
            return None;
        }

        let wire = match Wire::deserialize(&value) {
            Ok(w) => w,
            Err(e) => {
                tracing::trace!(error = %e, "dropping undecodable record");
                return None;
            }
        };
        let header = Header::deserialize(&value).unwrap_or_default();
        let task_id = header.task_id.or_else(|| self.fallback_task.clone());

        let event = match wire {
            Wire::Unknown => {
                tracing::trace!(kind = ?value.get("type"), "ignoring unknown event type");
                return None;
            }
            Wire::Heartbeat => return Some(StreamEvent::Heartbeat),
            Wire::NewMessage { message } => {
                let mut msg: ChatMessage = match serde_json::from_value(message?) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::trace!(error = %e, "dropping new_message with bad payload");
                        return None;
                    }
                };
                msg.pending = false;
                return Some(StreamEvent::NewMessage(msg));
            }
            Wire::MessageDeleted { message_id } => {
                return Some(StreamEvent::MessageDeleted {
                    message_id: message_id?,
                });
            }
            Wire::CommandApprovalRequest {
                command,
                tool_call_id,
            } => {
                let Some(task_id) = task_id else {
                    tracing::trace!("dropping approval request without task_id");
                    return None;
                };
                return Some(StreamEvent::CommandApprovalRequest(ApprovalRequest {
                    task_id,
                    command: command.unwrap_or_default(),
                    tool_call_id: tool_call_id.unwrap_or_default(),
                    payload: value.clone(),
                }));
            }
            Wire::TaskStarted => TaskEvent::Started,
            Wire::Content { content } => TaskEvent::Content(content.unwrap_or_default()),
            Wire::Thinking { content } => TaskEvent::Thinking(content.unwrap_or_default()),
            Wire::Context { context } => TaskEvent::Context(context),
            Wire::ToolCallStart(fields) => {
                let (id, name, _) = fields.resolve();
                TaskEvent::ToolCallStart { id, name }
            }
            Wire::ToolCall(fields) => {
                let (id, name, arguments) = fields.resolve();
                TaskEvent::ToolCall {
                    id,
                    name,
                    arguments,
                }
            }
            Wire::ToolResult {
                tool_call_id,
                result,
                duration_ms,
            } => TaskEvent::ToolResult {
                tool_call_id: tool_call_id.unwrap_or_default(),
                result: text_of(result),
                duration_ms: whole_millis(duration_ms),
            },
            Wire::ToolError {
                tool_call_id,
                error,
                duration_ms,
            } => TaskEvent::ToolError {
                tool_call_id: tool_call_id.unwrap_or_default(),
                error: text_of(error),
                duration_ms: whole_millis(duration_ms),
            },
            Wire::Usage { usage } => match serde_json::from_value::<TokenUsage>(usage?) {
                Ok(usage) => TaskEvent::Usage(usage),
                Err(e) => {
                    tracing::trace!(error = %e, "dropping usage event with bad payload");
                    return None;
                }
            },
            Wire::Truncated => TaskEvent::Truncated,
            Wire::Summary { summary } => TaskEvent::Summary(summary.unwrap_or_default()),
            Wire::Done { message_id } => TaskEvent::Done {
                message_id: MessageId::from_wire(message_id),
            },
            Wire::Error { error, error_meta } => TaskEvent::Error {
                error: non_empty(error).unwrap_or_else(|| DEFAULT_ERROR_TEXT.to_string()),
                // A bad meta block must not cost us the error itself.
                error_meta: error_meta
                    .filter(|v| !v.is_null())
                    .and_then(|v| serde_json::from_value::<BackendErrorMeta>(v).ok()),
            },
            Wire::Cancelled => TaskEvent::Cancelled,
        };

        let Some(task_id) = task_id else {
            tracing::trace!(kind = event.kind(), "dropping task event without task_id");
            return None;
        };
        Some(StreamEvent::Task {
            task_id,
            model: header.model.unwrap_or_default(),
            sender_label: header.sender_name.unwrap_or_default(),
            event,
        })
    }
}
