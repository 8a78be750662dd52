//! Tracing setup, scoped down from the teacher's `telemetry.rs`: env-
//! driven level filter, a pretty/json switch, and an optional rotating
//! file sink. The teacher's hex-truncation/progress-counter log helpers
//! have no counterpart in this domain and are dropped.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub struct TelemetryConfig {
    /// Service name, attached to every log line (`scanner`,
    /// `block-processor`, ...).
    pub service: &'static str,
    /// Emit newline-delimited JSON instead of the human-readable format.
    pub json: bool,
    /// Directory to additionally write a daily-rotated log file to, if
    /// set.
    pub log_dir: Option<String>,
}

/// Initializes the global `tracing` subscriber. Returns the file
/// appender's guard, which must be held for the process lifetime when
/// `log_dir` is set (dropping it stops the background writer).
pub fn init_tracing(config: TelemetryConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    let (file_layer, guard) = match config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, format!("{}.log", config.service));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    guard
}
