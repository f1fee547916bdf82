//! Following a single task through its own stream.
//!
//! The per-task endpoint replays one task from the start and carries no
//! `task_id` on its events, so the decoder is bound to the requested id.
//! The stream is read once, without reconnection, until the task reaches a
//! terminal event or the server closes.

use futures_util::StreamExt;
use st_core::decoder::EventDecoder;
use st_core::{frame, Dispatcher, Effect, TaskOutcome, TaskStreamState};
use st_types::{ChatMessage, StreamEvent, TaskEvent, TaskId};

use crate::error::ClientError;
use crate::http::{ByteStream, StudioClient};

/// What a followed task produced.
#[derive(Debug, Clone)]
pub struct TaskReplay {
    pub task_id: TaskId,
    /// Finalized messages, in append order.
    pub messages: Vec<ChatMessage>,
    /// `None` when the stream ended before a terminal event.
    pub outcome: Option<TaskOutcome>,
    /// Accumulated state of a task the stream left unfinished.
    pub unfinished: Option<TaskStreamState>,
    /// The output hit the model's length limit at least once.
    pub truncated: bool,
    /// Notices raised along the way (error summaries, context summaries).
    pub notices: Vec<String>,
}

/// Open `GET {api}/tasks/{id}/stream` and follow it to completion.
pub async fn follow_task(
    client: &StudioClient,
    task_id: &TaskId,
) -> Result<TaskReplay, ClientError> {
    let stream = client.open_task_stream(task_id).await?;
    replay(stream, task_id.clone()).await
}

/// Drive an already-open single-task stream.
pub async fn replay(stream: ByteStream, task_id: TaskId) -> Result<TaskReplay, ClientError> {
    let decoder = EventDecoder::for_task(task_id.clone());
    let mut dispatcher = Dispatcher::default();
    let mut outcome = None;
    let mut notices = Vec::new();
    let mut truncated = false;

    let mut records = Box::pin(frame::records(stream));
    'read: while let Some(record) = records.next().await {
        let Some(event) = decoder.decode(&record?) else {
            continue;
        };
        if let StreamEvent::Task {
            event: TaskEvent::Truncated,
            ..
        } = &event
        {
            truncated = true;
        }
        for effect in dispatcher.dispatch(event) {
            match effect {
                Effect::Notice { text, .. } => notices.push(text),
                Effect::TaskFinished {
                    task_id: finished,
                    outcome: o,
                } if finished == task_id => {
                    outcome = Some(o);
                    break 'read;
                }
                _ => {}
            }
        }
    }

    let unfinished = dispatcher.snapshot(&task_id);
    tracing::debug!(
        task_id = %task_id,
        outcome = ?outcome,
        unfinished = unfinished.is_some(),
        truncated,
        "task stream ended"
    );
    Ok(TaskReplay {
        task_id,
        messages: dispatcher.messages().to_vec(),
        outcome,
        unfinished,
        truncated,
        notices,
    })
}
