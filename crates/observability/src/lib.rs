//! Process-wide tracing setup for binaries embedding the bus.

pub mod tracing;

pub use crate::tracing::{LogFormat, TracingConfig};

/// Initialize tracing with the defaults (JSON lines, `info` unless `RUST_LOG` says otherwise).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(&TracingConfig::default());
}

/// Initialize tracing with an explicit configuration.
pub fn init_with(config: &TracingConfig) {
    tracing::init(config);
}
