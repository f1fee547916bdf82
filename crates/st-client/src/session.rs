//! The session actor.
//!
//! A single tokio task owns the [`Dispatcher`] and the [`Supervisor`].
//! Decoded events arrive from the connection task and commands arrive from
//! any number of [`SessionHandle`] clones, both over `flume` channels, so
//! the task registry is only ever touched from one place.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use st_core::capabilities::CapabilityStore;
use st_core::config::StreamConfig;
use st_core::{Dispatcher, DispatcherOptions, Effect, NoticeLevel, TaskOutcome, TaskStreamState};
use st_types::{ApprovalRequest, ChatMessage, MessageId, TaskId, TokenUsage};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::http::{EventSource, TaskCanceller};
use crate::supervisor::{Inbound, ReconnectPolicy, Supervisor};

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Callbacks the actor invokes while applying dispatcher effects. Every
/// method defaults to a no-op.
#[allow(unused_variables)]
pub trait SessionHooks: Send + 'static {
    fn scroll_to_bottom(&mut self) {}

    fn refresh_context(&mut self) {}

    /// Send `prompt` as a fresh user message on behalf of the user.
    fn resubmit(&mut self, task_id: &TaskId, prompt: &str, attempt: u32) {}

    fn approval_requested(&mut self, request: &ApprovalRequest) {}

    fn notify(&mut self, level: NoticeLevel, text: &str) {}

    fn context_changed(&mut self, context: &Value) {}

    fn usage_changed(&mut self, usage: &TokenUsage) {}

    fn task_finished(&mut self, task_id: &TaskId, outcome: TaskOutcome) {}

    fn connection_changed(&mut self, connected: bool) {}
}

/// Hooks that ignore everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl SessionHooks for NoHooks {}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

enum Command {
    Subscribe,
    Unsubscribe,
    Cancel(TaskId),
    Track(TaskId),
    PushPending {
        content: String,
        sender: String,
        reply: oneshot::Sender<MessageId>,
    },
    Snapshot {
        task_id: TaskId,
        reply: oneshot::Sender<Option<TaskStreamState>>,
    },
    Snapshots(oneshot::Sender<Vec<TaskStreamState>>),
    Messages(oneshot::Sender<Vec<ChatMessage>>),
    IsStreaming(oneshot::Sender<bool>),
    Shutdown,
}

/// A delayed auto-continue that came due.
struct Resubmit {
    task_id: TaskId,
    prompt: String,
    attempt: u32,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cheap, cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: flume::Sender<Command>,
}

impl SessionHandle {
    fn send(&self, cmd: Command) -> Result<(), ClientError> {
        self.commands.send(cmd).map_err(|_| ClientError::SessionClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send_async(make(tx))
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    /// Open (or reopen) the event stream.
    pub fn subscribe(&self) -> Result<(), ClientError> {
        self.send(Command::Subscribe)
    }

    pub fn unsubscribe(&self) -> Result<(), ClientError> {
        self.send(Command::Unsubscribe)
    }

    /// Stop a task. Local bookkeeping happens immediately; the backend
    /// request is best effort.
    pub fn cancel(&self, task_id: TaskId) -> Result<(), ClientError> {
        self.send(Command::Cancel(task_id))
    }

    /// Mark a task as started from this client.
    pub fn track_task(&self, task_id: TaskId) -> Result<(), ClientError> {
        self.send(Command::Track(task_id))
    }

    pub async fn push_pending(
        &self,
        content: impl Into<String>,
        sender: impl Into<String>,
    ) -> Result<MessageId, ClientError> {
        let content = content.into();
        let sender = sender.into();
        self.request(|reply| Command::PushPending {
            content,
            sender,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self, task_id: TaskId) -> Result<Option<TaskStreamState>, ClientError> {
        self.request(|reply| Command::Snapshot { task_id, reply }).await
    }

    pub async fn snapshots(&self) -> Result<Vec<TaskStreamState>, ClientError> {
        self.request(Command::Snapshots).await
    }

    pub async fn messages(&self) -> Result<Vec<ChatMessage>, ClientError> {
        self.request(Command::Messages).await
    }

    pub async fn is_streaming(&self) -> Result<bool, ClientError> {
        self.request(Command::IsStreaming).await
    }

    /// Ask the actor to stop. Pending auto-continues are dropped and the
    /// connection is closed.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.send(Command::Shutdown)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct SessionBuilder<H> {
    source: Arc<dyn EventSource>,
    canceller: Arc<dyn TaskCanceller>,
    hooks: H,
    capabilities: Option<Box<dyn CapabilityStore>>,
    history: Vec<ChatMessage>,
    stream: StreamConfig,
    options: DispatcherOptions,
}

impl SessionBuilder<NoHooks> {
    pub fn new(source: Arc<dyn EventSource>, canceller: Arc<dyn TaskCanceller>) -> Self {
        Self {
            source,
            canceller,
            hooks: NoHooks,
            capabilities: None,
            history: Vec::new(),
            stream: StreamConfig::default(),
            options: DispatcherOptions::default(),
        }
    }
}

impl<H: SessionHooks> SessionBuilder<H> {
    pub fn hooks<H2: SessionHooks>(self, hooks: H2) -> SessionBuilder<H2> {
        SessionBuilder {
            source: self.source,
            canceller: self.canceller,
            hooks,
            capabilities: self.capabilities,
            history: self.history,
            stream: self.stream,
            options: self.options,
        }
    }

    pub fn capabilities(mut self, store: impl CapabilityStore + 'static) -> Self {
        self.capabilities = Some(Box::new(store));
        self
    }

    /// Messages already loaded for the project.
    pub fn history(mut self, messages: Vec<ChatMessage>) -> Self {
        self.history = messages;
        self
    }

    pub fn stream_config(mut self, config: &StreamConfig) -> Self {
        self.stream = config.clone();
        self
    }

    pub fn dispatcher_options(mut self, options: DispatcherOptions) -> Self {
        self.options = options;
        self
    }

    /// Start the actor. The stream is not opened until
    /// [`SessionHandle::subscribe`] is called.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = flume::unbounded();
        let (inbound_tx, inbound_rx) = flume::bounded(self.stream.channel_capacity.max(1));
        let (timer_tx, timer_rx) = flume::unbounded();

        let actor = Actor {
            dispatcher: Dispatcher::with_messages(self.options, self.history),
            supervisor: Supervisor::new(
                self.source,
                ReconnectPolicy::from(&self.stream),
                inbound_tx,
            ),
            canceller: self.canceller,
            hooks: self.hooks,
            capabilities: self.capabilities,
            yield_every: self.stream.yield_every.max(1),
            processed: 0,
            timers: CancellationToken::new(),
            timer_tx,
        };
        let handle = tokio::spawn(actor.run(cmd_rx, inbound_rx, timer_rx));
        (SessionHandle { commands: cmd_tx }, handle)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Actor<H> {
    dispatcher: Dispatcher,
    supervisor: Supervisor,
    canceller: Arc<dyn TaskCanceller>,
    hooks: H,
    capabilities: Option<Box<dyn CapabilityStore>>,
    yield_every: usize,
    processed: usize,
    /// Parent of every delayed resubmit.
    timers: CancellationToken,
    timer_tx: flume::Sender<Resubmit>,
}

impl<H: SessionHooks> Actor<H> {
    async fn run(
        mut self,
        commands: flume::Receiver<Command>,
        inbound: flume::Receiver<Inbound>,
        timers: flume::Receiver<Resubmit>,
    ) {
        tracing::debug!("session started");
        loop {
            tokio::select! {
                cmd = commands.recv_async() => {
                    let Ok(cmd) = cmd else { break };
                    if !self.on_command(cmd) {
                        break;
                    }
                }
                Ok(msg) = inbound.recv_async() => self.on_inbound(msg).await,
                Ok(due) = timers.recv_async() => {
                    tracing::info!(
                        task_id = %due.task_id,
                        attempt = due.attempt,
                        "auto-continuing task"
                    );
                    self.hooks.resubmit(&due.task_id, &due.prompt, due.attempt);
                }
            }
        }
        self.timers.cancel();
        self.supervisor.unsubscribe();
        tracing::debug!("session stopped");
    }

    /// Returns false when the actor should stop.
    fn on_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Subscribe => {
                self.supervisor.subscribe();
            }
            Command::Unsubscribe => {
                self.supervisor.unsubscribe();
                self.hooks.connection_changed(false);
            }
            Command::Cancel(task_id) => self.cancel(task_id),
            Command::Track(task_id) => self.dispatcher.track_task(task_id),
            Command::PushPending {
                content,
                sender,
                reply,
            } => {
                let (id, effects) = self.dispatcher.push_pending_user_message(&content, &sender);
                self.apply(effects);
                let _ = reply.send(id);
            }
            Command::Snapshot { task_id, reply } => {
                let _ = reply.send(self.dispatcher.snapshot(&task_id));
            }
            Command::Snapshots(reply) => {
                let _ = reply.send(self.dispatcher.snapshots());
            }
            Command::Messages(reply) => {
                let _ = reply.send(self.dispatcher.messages().to_vec());
            }
            Command::IsStreaming(reply) => {
                let _ = reply.send(self.dispatcher.is_streaming());
            }
            Command::Shutdown => return false,
        }
        true
    }

    async fn on_inbound(&mut self, msg: Inbound) {
        if !self.supervisor.is_current(msg.generation()) {
            tracing::trace!(
                generation = msg.generation(),
                "dropping message from stale connection"
            );
            return;
        }
        match msg {
            Inbound::Connected { generation, attempt } => {
                tracing::info!(generation, attempt, "event stream connected");
                self.hooks.connection_changed(true);
            }
            Inbound::Disconnected {
                generation,
                error,
                retry_in,
            } => {
                tracing::debug!(
                    generation,
                    error = error.as_deref().unwrap_or("closed"),
                    delay_ms = retry_in.as_millis() as u64,
                    "event stream disconnected"
                );
                self.hooks.connection_changed(false);
            }
            Inbound::Event { event, .. } => {
                let effects = self.dispatcher.dispatch(event);
                self.apply(effects);
                self.processed += 1;
                if self.processed % self.yield_every == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    fn cancel(&mut self, task_id: TaskId) {
        let effects = self.dispatcher.cancel_local(&task_id);
        self.apply(effects);

        let canceller = self.canceller.clone();
        tokio::spawn(async move {
            if let Err(e) = canceller.cancel(&task_id).await {
                tracing::warn!(task_id = %task_id, error = %e, "backend cancel failed");
            }
        });
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut scroll = false;
        for effect in effects {
            match effect {
                Effect::ScrollToBottom => scroll = true,
                Effect::RefreshContext => self.hooks.refresh_context(),
                Effect::Resubmit {
                    task_id,
                    prompt,
                    delay,
                    attempt,
                } => self.schedule(task_id, prompt, delay, attempt),
                Effect::ApprovalRequested(request) => self.hooks.approval_requested(&request),
                Effect::Notice { level, text } => self.hooks.notify(level, &text),
                Effect::CapabilityLearned { model, meta } => {
                    if let Some(store) = self.capabilities.as_mut() {
                        if let Err(e) = store.learn(&model, &meta) {
                            tracing::warn!(model, error = %e, "failed to record model capability");
                        }
                    }
                }
                Effect::ContextChanged(context) => self.hooks.context_changed(&context),
                Effect::UsageChanged(usage) => self.hooks.usage_changed(&usage),
                Effect::TaskFinished { task_id, outcome } => {
                    self.hooks.task_finished(&task_id, outcome)
                }
            }
        }
        if scroll {
            self.hooks.scroll_to_bottom();
        }
    }

    fn schedule(&self, task_id: TaskId, prompt: String, delay: Duration, attempt: u32) {
        let token = self.timers.child_token();
        let tx = self.timer_tx.clone();
        tracing::debug!(
            task_id = %task_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "auto-continue scheduled"
        );
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Resubmit { task_id, prompt, attempt });
                }
            }
        });
    }
}
