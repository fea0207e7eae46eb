//! Tracing bootstrap.

use std::sync::OnceLock;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global tracing subscriber once. `RUST_LOG` wins over the
/// fallback level; repeated calls are no-ops.
pub fn init_tracing(fallback_level: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback_level))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}
