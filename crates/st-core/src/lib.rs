//! Core of studio-sync: everything between raw stream bytes and the shared
//! chat message list, with no I/O of its own.
//!
//! - [`frame`]: byte chunks -> `data:` record payloads
//! - [`decoder`]: payload -> typed [`st_types::StreamEvent`]
//! - [`registry`]: per-task accumulators
//! - [`dispatcher`]: the state machine tying registry and message list together
//! - [`reconciler`]: optimistic/server message merging
//! - [`error_classifier`]: error text -> [`st_types::ErrorMeta`]
//! - [`capabilities`]: learned per-model limits
//! - [`config`]: TOML configuration

pub mod capabilities;
pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod error_classifier;
pub mod frame;
pub mod reconciler;
pub mod registry;

pub use dispatcher::{Dispatcher, DispatcherOptions, Effect, NoticeLevel, TaskOutcome};
pub use registry::TaskStreamState;
