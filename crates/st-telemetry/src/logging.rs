//! Subscriber installation for the CLI and the test suites.
//!
//! The sync client runs as a long-lived watcher as often as a one-shot
//! command, so the output format is picked per process: plain lines for a
//! terminal, JSON lines when the output is piped into a collector. Both
//! formats honour `RUST_LOG` first and the configured level second.
//!
//! Installation is idempotent. Tests in several crates call it from many
//! threads and only the first subscriber sticks.

use tracing_subscriber::{fmt, EnvFilter};

/// Directive used when `RUST_LOG` is unset and no level is configured.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn label(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

/// The level a session starts with when `RUST_LOG` is absent. A blank
/// configured level counts as absent too.
fn configured_directive(level: &str) -> &str {
    match level.trim() {
        "" => DEFAULT_DIRECTIVE,
        trimmed => trimmed,
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(configured_directive(level)))
}

/// Install a subscriber in the given format. Returns `false` when one was
/// already installed, in which case nothing changes.
pub fn install(service: &str, level: &str, format: LogFormat) -> bool {
    let builder = fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let installed = match format {
        LogFormat::Pretty => builder.with_thread_ids(false).try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };
    if installed {
        tracing::info!(service, format = format.label(), "logging ready");
    }
    installed
}

/// Plain-text logging for interactive use, e.g. `"st_client=debug,warn"`.
pub fn init_logging(service: &str, level: &str) {
    install(service, level, LogFormat::Pretty);
}

/// One JSON object per line.
pub fn init_logging_json(service: &str, level: &str) {
    install(service, level, LogFormat::Json);
}

/// Pick the format from the CLI's `--json-logs` switch.
pub fn init_with_format(service: &str, level: &str, json: bool) {
    let format = if json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    install(service, level, format);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_level_uses_default_directive() {
        assert_eq!(configured_directive(""), DEFAULT_DIRECTIVE);
        assert_eq!(configured_directive("   "), DEFAULT_DIRECTIVE);
        assert_eq!(configured_directive(" st_core=trace "), "st_core=trace");
    }

    #[test]
    fn second_install_is_refused() {
        install("logging-unit", "debug", LogFormat::Pretty);
        assert!(!install("logging-unit", "debug", LogFormat::Json));
    }
}
