//! Logging setup for the shred CLI

use tracing_subscriber::EnvFilter;

/// Initialize console logging. `RUST_LOG` overrides the default level.
pub fn init() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .init();
}
