//! Connection lifecycle for the project event bus.
//!
//! One [`CancellationToken`] guards one connection loop: connect, pump
//! records until the stream ends, wait, reconnect. Subscribing again or
//! unsubscribing cancels the token, which aborts both a live read and a
//! pending reconnect wait. Every message sent upstream is stamped with the
//! generation of the loop that produced it, so the receiver can drop
//! anything from a superseded connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use st_core::config::StreamConfig;
use st_core::decoder::EventDecoder;
use st_core::frame;
use st_types::StreamEvent;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::http::EventSource;

/// Messages from a connection loop to its owner.
#[derive(Debug)]
pub enum Inbound {
    Connected {
        generation: u64,
        attempt: u64,
    },
    Event {
        generation: u64,
        event: StreamEvent,
    },
    /// The connection ended; another attempt follows after `retry_in`.
    Disconnected {
        generation: u64,
        error: Option<String>,
        retry_in: Duration,
    },
}

impl Inbound {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Connected { generation, .. }
            | Self::Event { generation, .. }
            | Self::Disconnected { generation, .. } => *generation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub after_close: Duration,
    pub after_error: Duration,
}

impl From<&StreamConfig> for ReconnectPolicy {
    fn from(cfg: &StreamConfig) -> Self {
        Self {
            after_close: cfg.reconnect_after_close(),
            after_error: cfg.reconnect_after_error(),
        }
    }
}

struct Connection {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Supervisor {
    source: Arc<dyn EventSource>,
    decoder: EventDecoder,
    policy: ReconnectPolicy,
    sink: flume::Sender<Inbound>,
    current: Option<Connection>,
    generation: u64,
}

impl Supervisor {
    pub fn new(
        source: Arc<dyn EventSource>,
        policy: ReconnectPolicy,
        sink: flume::Sender<Inbound>,
    ) -> Self {
        Self {
            source,
            decoder: EventDecoder::new(),
            policy,
            sink,
            current: None,
            generation: 0,
        }
    }

    /// Replace any existing connection with a fresh one. Returns its
    /// generation.
    pub fn subscribe(&mut self) -> u64 {
        self.unsubscribe();
        self.generation += 1;
        let generation = self.generation;
        let token = CancellationToken::new();

        tracing::info!(
            generation,
            target_url = %self.source.describe(),
            "subscribing to event stream"
        );
        let handle = tokio::spawn(run(
            self.source.clone(),
            self.decoder.clone(),
            self.policy,
            self.sink.clone(),
            token.clone(),
            generation,
        ));
        self.current = Some(Connection {
            generation,
            token,
            handle,
        });
        generation
    }

    /// Tear down the live connection and any pending reconnect. Never
    /// reconnects afterwards.
    pub fn unsubscribe(&mut self) {
        if let Some(conn) = self.current.take() {
            tracing::info!(generation = conn.generation, "unsubscribing from event stream");
            conn.token.cancel();
            conn.handle.abort();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.current.is_some()
    }

    /// Whether `generation` belongs to the live connection loop.
    pub fn is_current(&self, generation: u64) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.generation == generation)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

enum Outcome {
    Closed,
    Failed(ClientError),
    SinkGone,
}

async fn run(
    source: Arc<dyn EventSource>,
    decoder: EventDecoder,
    policy: ReconnectPolicy,
    sink: flume::Sender<Inbound>,
    token: CancellationToken,
    generation: u64,
) {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            _ = token.cancelled() => return,
            outcome = pump(&*source, &decoder, &sink, generation, attempt) => outcome,
        };

        let (retry_in, error) = match outcome {
            Outcome::SinkGone => return,
            Outcome::Closed => {
                tracing::debug!(generation, attempt, "event stream closed by server");
                (policy.after_close, None)
            }
            Outcome::Failed(e) => {
                tracing::warn!(generation, attempt, error = %e, "event stream failed");
                (policy.after_error, Some(e.to_string()))
            }
        };
        if token.is_cancelled() {
            return;
        }
        let notice = Inbound::Disconnected {
            generation,
            error,
            retry_in,
        };
        if sink.send_async(notice).await.is_err() {
            return;
        }

        tracing::debug!(generation, delay_ms = retry_in.as_millis() as u64, "reconnect scheduled");
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(retry_in) => {}
        }
    }
}

/// One connection attempt, from connect to end of stream.
async fn pump(
    source: &dyn EventSource,
    decoder: &EventDecoder,
    sink: &flume::Sender<Inbound>,
    generation: u64,
    attempt: u64,
) -> Outcome {
    let stream = match source.connect().await {
        Ok(s) => s,
        Err(e) => return Outcome::Failed(e),
    };
    if sink
        .send_async(Inbound::Connected {
            generation,
            attempt,
        })
        .await
        .is_err()
    {
        return Outcome::SinkGone;
    }

    let mut records = Box::pin(frame::records(stream));
    while let Some(record) = records.next().await {
        let payload = match record {
            Ok(p) => p,
            Err(e) => return Outcome::Failed(e),
        };
        let Some(event) = decoder.decode(&payload) else {
            continue;
        };
        if sink
            .send_async(Inbound::Event { generation, event })
            .await
            .is_err()
        {
            return Outcome::SinkGone;
        }
    }
    Outcome::Closed
}
