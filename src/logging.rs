//! Structured logging initialization.
//!
//! One-shot tracing setup used by binaries and integration tests. Library
//! code only emits through `tracing` macros and never installs a subscriber
//! on its own.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize tracing output once per process.
///
/// Honors `RUST_LOG` for filtering (default `info`) and emits JSON when
/// `DOCFLOW_LOG_FORMAT=json` is set. Safe to call repeatedly; a subscriber
/// installed elsewhere wins silently.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("DOCFLOW_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let result = if json {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).json())
                .with(filter)
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true))
                .with(filter)
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("global tracing subscriber already installed");
        }
    });
}
