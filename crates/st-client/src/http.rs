//! HTTP transport for the studio API.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use st_core::config::ClientConfig;
use st_types::{TaskId, TaskStatus};

use crate::error::ClientError;

/// Raw body chunks of one streaming response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ClientError>> + Send>>;

/// Longest error body echoed into [`ClientError::Api`].
const MAX_ERROR_BODY: usize = 200;

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Something that can open the event stream. Each call is one connection
/// attempt; the returned stream ends when the server closes cleanly.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<ByteStream, ClientError>;

    /// Human-readable target for logs.
    fn describe(&self) -> String;
}

/// Backend side of task cancellation.
#[async_trait]
pub trait TaskCanceller: Send + Sync {
    async fn cancel(&self, task_id: &TaskId) -> Result<(), ClientError>;
}

// ---------------------------------------------------------------------------
// StudioClient
// ---------------------------------------------------------------------------

/// Reusable client + base URL + optional bearer token.
#[derive(Clone)]
pub struct StudioClient {
    client: reqwest::Client,
    base: String,
    token: Option<String>,
    request_timeout: Duration,
}

impl std::fmt::Debug for StudioClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudioClient")
            .field("base", &self.base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl StudioClient {
    pub fn new(config: &ClientConfig, token: Option<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base: config.api_url.trim_end_matches('/').to_string(),
            token,
            request_timeout: config.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn project_events_url(&self, project_id: &str) -> String {
        format!("{}/projects/{project_id}/events", self.base)
    }

    pub fn task_stream_url(&self, task_id: &TaskId) -> String {
        format!("{}/tasks/{task_id}/stream", self.base)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.header(AUTHORIZATION, format!("Bearer {token}")),
            None => req,
        }
    }

    /// Open a long-lived event stream. No overall timeout applies.
    async fn open_stream(&self, url: &str) -> Result<ByteStream, ClientError> {
        tracing::debug!(url, "opening event stream");
        let resp = self
            .authorized(self.client.get(url))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(ClientError::from));
        Ok(Box::pin(body))
    }

    pub async fn open_project_events(&self, project_id: &str) -> Result<ByteStream, ClientError> {
        self.open_stream(&self.project_events_url(project_id)).await
    }

    /// Replay stream of a single task. Its events carry no `task_id`.
    pub async fn open_task_stream(&self, task_id: &TaskId) -> Result<ByteStream, ClientError> {
        self.open_stream(&self.task_stream_url(task_id)).await
    }

    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<(), ClientError> {
        let url = format!("{}/tasks/{task_id}/cancel", self.base);
        let resp = self
            .authorized(self.client.post(&url))
            .timeout(self.request_timeout)
            .send()
            .await?;
        check_status(resp).await?;
        tracing::debug!(task_id = %task_id, "cancel acknowledged");
        Ok(())
    }

    pub async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatus, ClientError> {
        let url = format!("{}/tasks/{task_id}/status", self.base);
        let resp = self
            .authorized(self.client.get(&url))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        resp.json::<TaskStatus>()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }

    /// Event source bound to one project's bus.
    pub fn project_events(&self, project_id: impl Into<String>) -> ProjectEvents {
        ProjectEvents {
            client: self.clone(),
            project_id: project_id.into(),
        }
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl TaskCanceller for StudioClient {
    async fn cancel(&self, task_id: &TaskId) -> Result<(), ClientError> {
        self.cancel_task(task_id).await
    }
}

/// [`EventSource`] for `GET {api}/projects/{id}/events`.
#[derive(Debug, Clone)]
pub struct ProjectEvents {
    client: StudioClient,
    project_id: String,
}

impl ProjectEvents {
    pub fn into_source(self) -> Arc<dyn EventSource> {
        Arc::new(self)
    }
}

#[async_trait]
impl EventSource for ProjectEvents {
    async fn connect(&self) -> Result<ByteStream, ClientError> {
        self.client.open_project_events(&self.project_id).await
    }

    fn describe(&self) -> String {
        self.client.project_events_url(&self.project_id)
    }
}
