//! Logging setup for deltacat
//!
//! The catalog reports through `tracing`; embedders install whatever
//! subscriber they like. [`init_logging`] is a convenience for binaries and
//! tests that just want readable output.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Human-readable output
    #[default]
    Pretty,
}

/// Install a global subscriber filtered by `RUST_LOG` (default `info`).
/// Later calls are no-ops, as is calling it after another subscriber was set.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let _ = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };
    });
}

/// Span wrapping one manager operation on a bucket prefix
#[must_use]
pub fn manager_span(operation: &str, bucket: &str, prefix: &str) -> Span {
    tracing::info_span!("table_manager", op = operation, bucket = bucket, prefix = prefix)
}
