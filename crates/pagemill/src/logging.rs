//! Process-wide log setup for the binary and for embedders that want it.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::PagemillError;

const DEFAULT_FILTER: &str = "info";

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `info`. Records emitted
/// through the `log` facade are forwarded into tracing. With `json` set,
/// every event is written as one JSON object per line.
pub fn init_logging(json: bool) -> Result<(), PagemillError> {
    tracing_log::LogTracer::init().map_err(|e| PagemillError::Logging(e.to_string()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = Registry::default().with(filter);

    let result = if json {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        )
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))
    };

    result.map_err(|e| PagemillError::Logging(e.to_string()))
}
