//! Tracing setup: human-readable stderr output plus an optional JSON file.

use fbl_config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const CRATES: [&str; 4] = ["fbl", "fbl_engine", "fbl_plugin", "fbl_config"];

fn directives(level: &str, fallback: &str) -> String {
    let mut parts: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
    parts.push(fallback.to_string());
    parts.join(",")
}

/// Install the global subscriber. `RUST_LOG` overrides the console filter.
///
/// The returned guard flushes the file writer and must live until exit.
pub fn init(verbose: bool, config: Option<&LoggingConfig>) -> Option<WorkerGuard> {
    let level = if verbose {
        "debug"
    } else {
        config.and_then(|c| c.level.as_deref()).unwrap_or("info")
    };
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(level, "warn")));

    let (file_layer, guard) = match config.and_then(|c| c.file.as_ref()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fbl.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(directives("trace", "info")));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();

    guard
}
