//! Event dispatcher: the per-session state machine.
//!
//! Owns the task registry, the shared message list and the bookkeeping that
//! used to live in globals (tracked task ids, auto-continue counter). Side
//! effects are returned as [`Effect`] values for the caller to execute.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;
use st_types::{
    ApprovalRequest, BackendErrorMeta, ChatMessage, ErrorMeta, MessageId, StreamEvent, TaskEvent,
    TaskId, TokenUsage, ToolStatus,
};

use crate::config::AutoContinueConfig;
use crate::error_classifier::{classify, format_error_as_message};
use crate::reconciler::{finalized_message, MessageLog};
use crate::registry::{TaskRegistry, TaskStreamState};

/// Separates accumulated output from an appended error or stop marker.
pub const OUTPUT_SEPARATOR: &str = "\n\n---\n";
/// Appended when the backend reports a cancellation.
pub const STOPPED_MARKER: &str = "*⏹ Stopped*";
/// Appended when the local user stopped the task.
pub const MANUALLY_STOPPED_MARKER: &str = "*⏹ Stopped manually*";

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Finalized,
    Failed,
    Cancelled,
}

/// Side effects requested by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ScrollToBottom,
    RefreshContext,
    /// Send `prompt` as a new user message after `delay`.
    Resubmit {
        task_id: TaskId,
        prompt: String,
        delay: Duration,
        attempt: u32,
    },
    ApprovalRequested(ApprovalRequest),
    Notice {
        level: NoticeLevel,
        text: String,
    },
    CapabilityLearned {
        model: String,
        meta: ErrorMeta,
    },
    ContextChanged(Value),
    UsageChanged(TokenUsage),
    TaskFinished {
        task_id: TaskId,
        outcome: TaskOutcome,
    },
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub max_auto_continues: u32,
    pub auto_continue_delay: Duration,
    pub continue_prompt: String,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self::from(&AutoContinueConfig::default())
    }
}

impl From<&AutoContinueConfig> for DispatcherOptions {
    fn from(cfg: &AutoContinueConfig) -> Self {
        Self {
            max_auto_continues: cfg.max_auto_continues,
            auto_continue_delay: cfg.delay(),
            continue_prompt: cfg.prompt.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Dispatcher {
    registry: TaskRegistry,
    messages: MessageLog,
    my_tasks: HashSet<TaskId>,
    auto_continues: u32,
    current_context: Option<Value>,
    last_usage: Option<TokenUsage>,
    options: DispatcherOptions,
    effects: Vec<Effect>,
}

impl Dispatcher {
    pub fn new(options: DispatcherOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Start from an already-loaded message history.
    pub fn with_messages(options: DispatcherOptions, messages: Vec<ChatMessage>) -> Self {
        Self {
            options,
            messages: MessageLog::from_messages(messages),
            ..Default::default()
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn messages(&self) -> &[ChatMessage] {
        self.messages.messages()
    }

    pub fn snapshot(&self, task_id: &TaskId) -> Option<TaskStreamState> {
        self.registry.snapshot(task_id)
    }

    pub fn snapshots(&self) -> Vec<TaskStreamState> {
        self.registry.snapshots()
    }

    pub fn is_streaming(&self) -> bool {
        !self.registry.is_empty()
    }

    pub fn is_mine(&self, task_id: &TaskId) -> bool {
        self.my_tasks.contains(task_id)
    }

    pub fn auto_continues(&self) -> u32 {
        self.auto_continues
    }

    pub fn current_context(&self) -> Option<&Value> {
        self.current_context.as_ref()
    }

    pub fn last_usage(&self) -> Option<&TokenUsage> {
        self.last_usage.as_ref()
    }

    // -- local operations ---------------------------------------------------

    /// Mark a task as started by this client, making it eligible for
    /// auto-continuation.
    pub fn track_task(&mut self, task_id: TaskId) {
        self.my_tasks.insert(task_id);
    }

    /// Insert an optimistic user message ahead of the server echo.
    pub fn push_pending_user_message(
        &mut self,
        content: &str,
        sender_label: &str,
    ) -> (MessageId, Vec<Effect>) {
        let id = self
            .messages
            .push_pending(ChatMessage::pending_user(content, sender_label));
        self.effects.push(Effect::ScrollToBottom);
        (id, self.take_effects())
    }

    /// Local half of a user-initiated cancel. Always succeeds; the backend
    /// request is the caller's business.
    pub fn cancel_local(&mut self, task_id: &TaskId) -> Vec<Effect> {
        let state = self.registry.remove(task_id);
        if let Some(state) = &state {
            if !state.content_text.is_empty() {
                let content = format!(
                    "{}{OUTPUT_SEPARATOR}{MANUALLY_STOPPED_MARKER}",
                    state.content_text
                );
                self.append_from_task(state, MessageId::local(), content);
            }
        }
        tracing::info!(task_id = %task_id, known = state.is_some(), "task cancelled locally");
        self.finish(task_id, TaskOutcome::Cancelled);
        self.effects.push(Effect::ScrollToBottom);
        self.take_effects()
    }

    // -- event handling -----------------------------------------------------

    pub fn dispatch(&mut self, event: StreamEvent) -> Vec<Effect> {
        tracing::trace!(kind = event.kind(), task_id = ?event.task_id(), "dispatch");
        match event {
            StreamEvent::NewMessage(message) => {
                if self.messages.reconcile(message).changed() {
                    self.effects.push(Effect::ScrollToBottom);
                }
            }
            StreamEvent::MessageDeleted { message_id } => {
                if self.messages.remove(&message_id).is_some() {
                    self.effects.push(Effect::ScrollToBottom);
                }
            }
            StreamEvent::Heartbeat => {}
            StreamEvent::CommandApprovalRequest(request) => {
                self.effects.push(Effect::ApprovalRequested(request));
            }
            StreamEvent::Task {
                task_id,
                model,
                sender_label,
                event,
            } => self.dispatch_task(task_id, &model, &sender_label, event),
        }
        self.take_effects()
    }

    fn dispatch_task(
        &mut self,
        task_id: TaskId,
        model: &str,
        sender_label: &str,
        event: TaskEvent,
    ) {
        match event {
            TaskEvent::Started => {
                if self.registry.start(&task_id, model, sender_label) {
                    tracing::debug!(task_id = %task_id, model, "task started");
                    self.effects.push(Effect::ScrollToBottom);
                }
            }
            TaskEvent::Done { message_id } => {
                let state = self.take_state(&task_id, model, sender_label);
                self.on_done(&task_id, state, message_id);
            }
            TaskEvent::Error { error, error_meta } => {
                let state = self.take_state(&task_id, model, sender_label);
                self.on_error(&task_id, state, &error, error_meta.as_ref());
            }
            TaskEvent::Cancelled => {
                let state = self.take_state(&task_id, model, sender_label);
                if !state.content_text.is_empty() {
                    let content =
                        format!("{}{OUTPUT_SEPARATOR}{STOPPED_MARKER}", state.content_text);
                    self.append_from_task(&state, MessageId::local(), content);
                }
                tracing::info!(task_id = %task_id, "task cancelled");
                self.finish(&task_id, TaskOutcome::Cancelled);
                self.effects.push(Effect::ScrollToBottom);
            }
            other => self.accumulate(&task_id, model, sender_label, other),
        }
    }

    fn accumulate(&mut self, task_id: &TaskId, model: &str, sender_label: &str, event: TaskEvent) {
        let is_mine = self.my_tasks.contains(task_id);
        let state = self.registry.get_or_create(task_id, model, sender_label);
        let mut mutated = true;

        match event {
            TaskEvent::Content(text) => state.append_content(&text),
            TaskEvent::Thinking(text) => state.append_thinking(&text),
            TaskEvent::ToolCallStart { id, name } => state.start_tool(&id, &name),
            TaskEvent::ToolCall {
                id,
                name,
                arguments,
            } => state.call_tool(&id, &name, arguments),
            TaskEvent::ToolResult {
                tool_call_id,
                result,
                duration_ms,
            } => {
                mutated = state.finish_tool(&tool_call_id, ToolStatus::Done, result, duration_ms);
            }
            TaskEvent::ToolError {
                tool_call_id,
                error,
                duration_ms,
            } => {
                mutated =
                    state.finish_tool(&tool_call_id, ToolStatus::Error, error, duration_ms);
            }
            TaskEvent::Usage(usage) => {
                state.token_usage = Some(usage.clone());
                self.last_usage = Some(usage.clone());
                self.effects.push(Effect::UsageChanged(usage));
            }
            TaskEvent::Context(context) => {
                mutated = false;
                self.current_context = Some(context.clone());
                self.effects.push(Effect::ContextChanged(context));
            }
            TaskEvent::Summary(text) => {
                mutated = false;
                if !text.is_empty() {
                    self.effects.push(Effect::Notice {
                        level: NoticeLevel::Info,
                        text,
                    });
                }
            }
            TaskEvent::Truncated => {
                mutated = false;
                state.truncated = true;
                self.maybe_auto_continue(task_id, is_mine);
            }
            TaskEvent::Started
            | TaskEvent::Done { .. }
            | TaskEvent::Error { .. }
            | TaskEvent::Cancelled => {
                mutated = false;
            }
        }

        if mutated {
            self.effects.push(Effect::ScrollToBottom);
        }
    }

    fn maybe_auto_continue(&mut self, task_id: &TaskId, is_mine: bool) {
        if !is_mine {
            return;
        }
        if self.auto_continues >= self.options.max_auto_continues {
            tracing::debug!(
                task_id = %task_id,
                max = self.options.max_auto_continues,
                "auto-continue ceiling reached"
            );
            return;
        }
        self.auto_continues += 1;
        tracing::info!(
            task_id = %task_id,
            attempt = self.auto_continues,
            max = self.options.max_auto_continues,
            "output truncated, scheduling auto-continue"
        );
        self.effects.push(Effect::Resubmit {
            task_id: task_id.clone(),
            prompt: self.options.continue_prompt.clone(),
            delay: self.options.auto_continue_delay,
            attempt: self.auto_continues,
        });
    }

    fn on_done(&mut self, task_id: &TaskId, state: TaskStreamState, message_id: Option<MessageId>) {
        let id = message_id.unwrap_or_else(MessageId::local);
        if state.has_output() && !self.messages.contains(&id) {
            let content = state.content_text.clone();
            self.append_from_task(&state, id, content);
        }
        tracing::info!(task_id = %task_id, message_id = %id, "task done");
        self.finish(task_id, TaskOutcome::Finalized);
        self.effects.push(Effect::ScrollToBottom);
        self.effects.push(Effect::RefreshContext);
    }

    fn on_error(
        &mut self,
        task_id: &TaskId,
        state: TaskStreamState,
        error: &str,
        backend: Option<&BackendErrorMeta>,
    ) {
        let meta = classify(error, backend);
        let formatted = format_error_as_message(error, &meta);
        let content = if state.content_text.is_empty() {
            formatted
        } else {
            format!("{}{OUTPUT_SEPARATOR}{formatted}", state.content_text)
        };
        self.append_from_task(&state, MessageId::local(), content);

        tracing::warn!(
            task_id = %task_id,
            error_type = %meta.error_type,
            model = %state.model_name,
            "task failed"
        );
        if meta.error_type.updates_capabilities() && !state.model_name.is_empty() {
            self.effects.push(Effect::CapabilityLearned {
                model: state.model_name.clone(),
                meta: meta.clone(),
            });
        }
        self.effects.push(Effect::Notice {
            level: NoticeLevel::Warning,
            text: meta.summary,
        });
        self.finish(task_id, TaskOutcome::Failed);
        self.effects.push(Effect::ScrollToBottom);
        self.effects.push(Effect::RefreshContext);
    }

    // -- helpers ------------------------------------------------------------

    /// Remove the task, or synthesize an empty one for a terminal event on
    /// an id we never saw.
    fn take_state(&mut self, task_id: &TaskId, model: &str, sender_label: &str) -> TaskStreamState {
        self.registry
            .remove(task_id)
            .unwrap_or_else(|| TaskStreamState::new(task_id.clone(), model, sender_label, 0))
    }

    fn append_from_task(&mut self, state: &TaskStreamState, id: MessageId, content: String) {
        self.messages
            .append_finalized(finalized_message(state, id, content));
    }

    /// Bookkeeping shared by every terminal path.
    fn finish(&mut self, task_id: &TaskId, outcome: TaskOutcome) {
        self.auto_continues = 0;
        self.my_tasks.remove(task_id);
        self.effects.push(Effect::TaskFinished {
            task_id: task_id.clone(),
            outcome,
        });
    }

    fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }
}
