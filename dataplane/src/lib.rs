//! SDK for building data planes that speak the dataplane signaling protocol.
//!
//! A [`Dataplane`] tracks [data flows](flow::DataFlow) through their lifecycle, runs
//! application [hooks](hook::Hook) at each step, serves the signaling API through
//! [`Dataplane::controller`] and calls back the control plane when a flow changes state
//! asynchronously.

pub mod address;
pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod hook;
pub mod message;
pub mod sdk;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use address::{DataAddress, EndpointProperty};
pub use config::Options;
pub use error::Error;
pub use flow::{DataFlow, State};
pub use hook::Hook;
pub use sdk::{Builder, Dataplane};

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber filtered by `RUST_LOG`.
///
/// Defaults to `info` when `RUST_LOG` is unset. Calling this more than once is harmless, so tests
/// can call it unconditionally.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}
