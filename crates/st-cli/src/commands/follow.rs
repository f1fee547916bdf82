use st_client::follow_task;
use st_core::config::Config;
use st_types::TaskId;

use super::{api_client, friendly_error, render_message};

/// Replay one task and print what it produced.
pub async fn run(cfg: &Config, task_id: &str, json: bool) -> anyhow::Result<()> {
    let client = api_client(cfg)?;
    let replay = follow_task(&client, &TaskId::from(task_id))
        .await
        .map_err(friendly_error)?;

    for msg in &replay.messages {
        println!("{}", render_message(msg, json)?);
    }
    for notice in &replay.notices {
        eprintln!("{notice}");
    }
    if replay.truncated {
        eprintln!("Output was truncated by the model's length limit.");
    }
    match (replay.outcome, &replay.unfinished) {
        (Some(outcome), _) => tracing::debug!(task_id, ?outcome, "task finished"),
        (None, Some(state)) => {
            eprintln!(
                "Stream closed before task {} finished ({} chars so far).",
                state.task_id,
                state.content_text.chars().count()
            );
            if !json && !state.content_text.is_empty() {
                println!("{}", state.content_text);
            }
        }
        (None, None) => eprintln!("Stream closed with no output for task {task_id}."),
    }
    Ok(())
}
