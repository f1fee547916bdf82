use std::collections::HashSet;
use std::sync::Arc;

use st_client::{SessionBuilder, SessionHooks};
use st_core::capabilities::ModelCapabilities;
use st_core::config::Config;
use st_core::{DispatcherOptions, NoticeLevel, TaskOutcome};
use st_types::{ApprovalRequest, ChatMessage, MessageId, TaskId};

use super::{api_client, render_message};

/// Terminal side of a watch session. Anything that changes the message list
/// wakes the printer; repeated wake-ups collapse into one.
struct PrintHooks {
    changed: flume::Sender<()>,
}

impl SessionHooks for PrintHooks {
    fn scroll_to_bottom(&mut self) {
        let _ = self.changed.try_send(());
    }

    fn resubmit(&mut self, task_id: &TaskId, prompt: &str, attempt: u32) {
        eprintln!("Task {task_id} was truncated (continuation {attempt}). Send: {prompt:?}");
    }

    fn approval_requested(&mut self, request: &ApprovalRequest) {
        eprintln!(
            "Task {} wants to run a command:\n  {}",
            request.task_id, request.command
        );
    }

    fn notify(&mut self, level: NoticeLevel, text: &str) {
        match level {
            NoticeLevel::Info => eprintln!("{text}"),
            NoticeLevel::Warning => eprintln!("warning: {text}"),
        }
    }

    fn task_finished(&mut self, task_id: &TaskId, outcome: TaskOutcome) {
        tracing::debug!(task_id = %task_id, ?outcome, "task finished");
    }

    fn connection_changed(&mut self, connected: bool) {
        if connected {
            eprintln!("Connected.");
        } else {
            eprintln!("Disconnected, reconnecting...");
        }
    }
}

/// Print every confirmed message not printed before.
fn print_new(
    messages: &[ChatMessage],
    printed: &mut HashSet<MessageId>,
    json: bool,
) -> anyhow::Result<()> {
    for msg in messages.iter().filter(|m| !m.pending) {
        if printed.insert(msg.id) {
            println!("{}", render_message(msg, json)?);
        }
    }
    Ok(())
}

/// Follow a project's event stream until Ctrl-C.
pub async fn run(
    cfg: &Config,
    project_id: &str,
    tasks: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    let client = api_client(cfg)?;
    let store_path = cfg.capabilities.resolved_path();
    let capabilities = ModelCapabilities::open(&store_path).unwrap_or_else(|e| {
        tracing::warn!(
            path = %store_path.display(),
            error = %e,
            "capability store unreadable, keeping it in memory"
        );
        ModelCapabilities::in_memory()
    });

    let (changed_tx, changed_rx) = flume::bounded(1);
    let (session, join) = SessionBuilder::new(
        client.project_events(project_id).into_source(),
        Arc::new(client.clone()),
    )
    .hooks(PrintHooks { changed: changed_tx })
    .capabilities(capabilities)
    .stream_config(&cfg.stream)
    .dispatcher_options(DispatcherOptions::from(&cfg.auto_continue))
    .spawn();

    for task in tasks {
        session.track_task(TaskId::from(task))?;
    }
    session.subscribe()?;
    eprintln!("Watching project {project_id} (Ctrl-C to stop).");

    let mut printed = HashSet::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            woke = changed_rx.recv_async() => {
                if woke.is_err() {
                    break;
                }
                let messages = session.messages().await?;
                print_new(&messages, &mut printed, json)?;
            }
        }
    }

    let streaming = session.snapshots().await.unwrap_or_default();
    for state in streaming.iter().filter(|s| !s.content_text.is_empty()) {
        eprintln!(
            "Task {} still running ({} chars received).",
            state.task_id,
            state.content_text.chars().count()
        );
    }
    session.shutdown()?;
    let _ = join.await;
    Ok(())
}
