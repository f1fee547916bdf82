use st_core::config::Config;
use st_types::TaskId;

use super::{api_client, friendly_error};

/// Ask the backend to stop a task.
pub async fn run(cfg: &Config, task_id: &str) -> anyhow::Result<()> {
    let client = api_client(cfg)?;
    let task_id = TaskId::from(task_id);
    client.cancel_task(&task_id).await.map_err(friendly_error)?;
    println!("Task {task_id} cancelled.");
    Ok(())
}
