// src/lib.rs

pub mod config;
pub mod error;
pub mod fetch;
pub mod load;
pub mod mart;
pub mod merge;
pub mod pipeline;
pub mod store;
pub mod table;
pub mod validate;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber for a stage binary. `RUST_LOG` overrides the
/// `info` default.
pub fn init_tracing() {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env).init();
}
