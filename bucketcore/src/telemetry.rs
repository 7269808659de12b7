//! Process-level logging setup.

use tracing_subscriber::EnvFilter;

/// Layout of emitted log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Default multi-field layout.
    #[default]
    Full,
    /// Single-line condensed layout.
    Compact,
}

/// Install a global `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; returns `false` when a global subscriber
/// was already installed.
pub fn init_tracing(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match format {
        LogFormat::Full => builder.try_init().is_ok(),
        LogFormat::Compact => builder.compact().try_init().is_ok(),
    }
}

