//! Logging setup shared by the studio-sync crates and binaries.
//!
//! Everything in the workspace logs through `tracing`; this crate only owns
//! subscriber installation so binaries and tests pick the same format.

pub mod logging;
