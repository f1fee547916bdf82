pub mod cancel;
pub mod classify;
pub mod follow;
pub mod status;
pub mod watch;

use st_client::{ClientError, StudioClient};
use st_core::config::{bearer_token, Config};
use st_types::{ChatMessage, Role};

/// Build the API client from config plus the token in the environment.
pub fn api_client(cfg: &Config) -> anyhow::Result<StudioClient> {
    StudioClient::new(&cfg.client, bearer_token()).map_err(friendly_error)
}

/// Map common client errors to user-friendly messages.
pub fn friendly_error(err: ClientError) -> anyhow::Error {
    match err {
        e if e.is_connect() => anyhow::anyhow!(
            "Could not connect to the studio API. Is it running?\n  \
             (hint: check --api-url or client.api_url in the config)"
        ),
        ClientError::Timeout => {
            anyhow::anyhow!("Request timed out. The studio API may be overloaded.")
        }
        ClientError::Api { status: 401 | 403, .. } => anyhow::anyhow!(
            "The studio API rejected the credentials.\n  \
             (hint: set {})",
            st_core::config::TOKEN_ENV
        ),
        other => anyhow::anyhow!("API request failed: {other}"),
    }
}

/// One finalized message for the terminal.
pub fn render_message(msg: &ChatMessage, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string(msg)?);
    }
    let who = match msg.role {
        Role::User if msg.sender_label.is_empty() => "user",
        Role::Assistant if msg.sender_label.is_empty() => "assistant",
        _ => msg.sender_label.as_str(),
    };
    let mut out = format!("[{}] {who}:\n{}", msg.id, msg.content);
    if !msg.tool_calls.is_empty() {
        let names: Vec<&str> = msg.tool_calls.iter().map(|t| t.name.as_str()).collect();
        out.push_str(&format!("\n  tools: {}", names.join(", ")));
    }
    if let Some(usage) = &msg.token_usage {
        out.push_str(&format!("\n  tokens: {}", usage.total_tokens));
    }
    Ok(out)
}
