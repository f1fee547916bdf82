//! Network side of studio-sync.
//!
//! [`http::StudioClient`] talks to the studio API, [`supervisor::Supervisor`]
//! keeps the project event stream alive, and [`session`] runs the actor that
//! feeds decoded events into the core dispatcher.

pub mod error;
pub mod http;
pub mod session;
pub mod supervisor;
pub mod task_stream;

pub use error::ClientError;
pub use http::{ByteStream, EventSource, ProjectEvents, StudioClient, TaskCanceller};
pub use session::{NoHooks, SessionBuilder, SessionHandle, SessionHooks};
pub use task_stream::{follow_task, TaskReplay};
