use st_core::config::Config;
use st_types::TaskId;

use super::{api_client, friendly_error};

/// Print a task's status.
pub async fn run(cfg: &Config, task_id: &str) -> anyhow::Result<()> {
    let client = api_client(cfg)?;
    let status = client
        .task_status(&TaskId::from(task_id))
        .await
        .map_err(friendly_error)?;

    println!("Task {}", status.task_id);
    println!("  status:  {}", status.status);
    if !status.model.is_empty() {
        println!("  model:   {}", status.model);
    }
    if !status.task_type.is_empty() {
        println!("  type:    {}", status.task_type);
    }
    if let Some(project) = status.project_id {
        println!("  project: {project}");
    }
    if let Some(id) = status.result_message_id {
        println!("  result:  message {id}");
    }
    if status.has_error {
        println!(
            "  error:   {}",
            status.error_message.as_deref().unwrap_or("(no message)")
        );
    }
    if status.is_running() {
        println!("\nStill running. Follow it with `studio-sync follow {}`.", status.task_id);
    }
    Ok(())
}
