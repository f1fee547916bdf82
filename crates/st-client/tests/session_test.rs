use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use st_client::{ByteStream, ClientError, EventSource, SessionBuilder, SessionHooks, TaskCanceller};
use st_core::config::StreamConfig;
use st_core::dispatcher::MANUALLY_STOPPED_MARKER;
use st_core::{DispatcherOptions, NoticeLevel, TaskOutcome};
use st_types::{ChatMessage, MessageId, Role, TaskId};

// ===========================================================================
// Fakes
// ===========================================================================

/// Serves the same script on every connection and then holds the stream
/// open, so a session sees each record once per subscribe.
struct ScriptedSource {
    script: String,
}

impl ScriptedSource {
    fn new(lines: &[&str]) -> Arc<Self> {
        let script = lines.iter().map(|l| format!("data: {l}\n")).collect();
        Arc::new(Self { script })
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn connect(&self) -> Result<ByteStream, ClientError> {
        let chunks: Vec<Result<Vec<u8>, ClientError>> = self
            .script
            .as_bytes()
            .chunks(11)
            .map(|c| Ok(c.to_vec()))
            .collect();
        Ok(Box::pin(stream::iter(chunks).chain(stream::pending())))
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

#[derive(Default)]
struct RecordingCanceller {
    calls: Mutex<Vec<TaskId>>,
    fail: bool,
}

#[async_trait]
impl TaskCanceller for RecordingCanceller {
    async fn cancel(&self, task_id: &TaskId) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(task_id.clone());
        if self.fail {
            return Err(ClientError::Api {
                status: 500,
                message: "nope".into(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl SessionHooks for Recorder {
    fn resubmit(&mut self, task_id: &TaskId, prompt: &str, attempt: u32) {
        self.push(format!("resubmit {task_id} {attempt} {prompt}"));
    }

    fn notify(&mut self, level: NoticeLevel, text: &str) {
        self.push(format!("notice {level:?} {text}"));
    }

    fn task_finished(&mut self, task_id: &TaskId, outcome: TaskOutcome) {
        self.push(format!("finished {task_id} {outcome:?}"));
    }

    fn connection_changed(&mut self, connected: bool) {
        self.push(format!("connected {connected}"));
    }
}

/// Poll until `check` holds or two seconds pass.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn fast_options() -> DispatcherOptions {
    DispatcherOptions {
        max_auto_continues: 2,
        auto_continue_delay: Duration::from_millis(10),
        continue_prompt: "go on".into(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn streamed_task_becomes_message_and_echo_confirms_pending() {
    let source = ScriptedSource::new(&[
        r#"{"type":"new_message","message":{"id":10,"role":"user","content":"hello"}}"#,
        r#"{"type":"task_started","task_id":"1","model":"gpt-4o"}"#,
        r#"{"type":"content","task_id":"1","content":"Hi "}"#,
        r#"{"type":"content","task_id":"1","content":"there"}"#,
        r#"{"type":"done","task_id":"1","message_id":11}"#,
    ]);
    let recorder = Recorder::default();
    let (session, _join) = SessionBuilder::new(source, Arc::new(RecordingCanceller::default()))
        .hooks(recorder.clone())
        .spawn();

    let pending = session.push_pending("hello", "me").await.unwrap();
    assert!(!pending.is_server());
    session.subscribe().unwrap();

    eventually(|| {
        let session = session.clone();
        async move { session.messages().await.unwrap().len() == 2 }
    })
    .await;

    let messages: Vec<ChatMessage> = session.messages().await.unwrap();
    assert_eq!(messages[0].id, MessageId::Server(10));
    assert!(!messages[0].pending);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hi there");
    assert!(!session.is_streaming().await.unwrap());

    let log = recorder.entries();
    assert!(log.contains(&"connected true".to_string()));
    assert!(log.contains(&"finished 1 Finalized".to_string()));
}

#[tokio::test]
async fn cancel_keeps_partial_output_and_calls_backend() {
    let source = ScriptedSource::new(&[r#"{"type":"content","task_id":"5","content":"partial output"}"#]);
    let canceller = Arc::new(RecordingCanceller {
        fail: true,
        ..Default::default()
    });
    let (session, _join) = SessionBuilder::new(source, canceller.clone()).spawn();
    session.subscribe().unwrap();

    eventually(|| {
        let session = session.clone();
        async move { session.snapshot(TaskId::from("5")).await.unwrap().is_some() }
    })
    .await;

    session.cancel(TaskId::from("5")).unwrap();
    let messages = session.messages().await.unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].content.starts_with("partial output"));
    assert!(messages[0].content.ends_with(MANUALLY_STOPPED_MARKER));
    assert!(session.snapshots().await.unwrap().is_empty());

    // Backend failure is logged, not surfaced.
    eventually(|| {
        let calls = canceller.calls.lock().unwrap().len();
        async move { calls == 1 }
    })
    .await;
}

#[tokio::test]
async fn truncated_own_task_resubmits_after_delay() {
    let source = ScriptedSource::new(&[
        r#"{"type":"content","task_id":"7","content":"long answer"}"#,
        r#"{"type":"truncated","task_id":"7"}"#,
    ]);
    let recorder = Recorder::default();
    let (session, _join) = SessionBuilder::new(source, Arc::new(RecordingCanceller::default()))
        .hooks(recorder.clone())
        .dispatcher_options(fast_options())
        .spawn();
    session.track_task(TaskId::from("7")).unwrap();
    session.subscribe().unwrap();

    eventually(|| {
        let found = recorder.entries().iter().any(|e| e == "resubmit 7 1 go on");
        async move { found }
    })
    .await;
}

#[tokio::test]
async fn shutdown_drops_pending_resubmit_and_closes_handle() {
    let source = ScriptedSource::new(&[r#"{"type":"truncated","task_id":"3"}"#]);
    let recorder = Recorder::default();
    let options = DispatcherOptions {
        auto_continue_delay: Duration::from_millis(200),
        ..fast_options()
    };
    let (session, join) = SessionBuilder::new(source, Arc::new(RecordingCanceller::default()))
        .hooks(recorder.clone())
        .dispatcher_options(options)
        .stream_config(&StreamConfig::default())
        .spawn();
    session.track_task(TaskId::from("3")).unwrap();
    session.subscribe().unwrap();

    eventually(|| {
        let session = session.clone();
        async move { session.snapshot(TaskId::from("3")).await.unwrap().is_some() }
    })
    .await;

    session.shutdown().unwrap();
    tokio::time::timeout(Duration::from_secs(2), join)
        .await
        .expect("actor stops")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!recorder.entries().iter().any(|e| e.starts_with("resubmit")));
    assert!(matches!(
        session.messages().await,
        Err(ClientError::SessionClosed)
    ));
}

#[tokio::test]
async fn error_event_notifies_with_summary() {
    let source = ScriptedSource::new(&[
        r#"{"type":"error","task_id":"9","model":"gpt-4o","error":"Rate limit exceeded, 10 per 60s"}"#,
    ]);
    let recorder = Recorder::default();
    let (session, _join) = SessionBuilder::new(source, Arc::new(RecordingCanceller::default()))
        .hooks(recorder.clone())
        .capabilities(st_core::capabilities::ModelCapabilities::in_memory())
        .spawn();
    session.subscribe().unwrap();

    eventually(|| {
        let session = session.clone();
        async move { session.messages().await.unwrap().len() == 1 }
    })
    .await;

    let log = recorder.entries();
    assert!(log
        .iter()
        .any(|e| e.starts_with("notice Warning") && e.contains("Rate limited")));
    assert!(log.contains(&"finished 9 Failed".to_string()));
}
