//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global `tracing` subscriber once
//! - Take the level from config, overridable through `RUST_LOG`
//!
//! # Design Decisions
//! - `EnvFilter` scoped to this crate plus `tower_http` request spans
//! - Human-readable `fmt` output; log shipping is the host's concern

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(log_level: &str) -> String {
    format!("dualmode={},tower_http=info", log_level)
}

/// Install the global subscriber. A second call is ignored.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(log_level).into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
