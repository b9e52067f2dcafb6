use std::io::{self, IsTerminal};

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Logs to stderr at `warn`, or `debug` when verbose. `RUST_LOG` overrides
/// both.
pub fn init_tracing(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stderr = io::stderr;
    let ansi = stderr().is_terminal();
    let stderr_layer = fmt::layer()
        .with_writer(stderr)
        .with_ansi(ansi)
        .without_time();

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .init();
}
