//! Axum WebSocket adapter for voxbridge.
//!
//! One WebSocket per participant multiplexes binary PCM and JSON control
//! messages; one hub task per call owns the session aggregate and all
//! fan-in/fan-out. The speech pipeline itself lives in `voxbridge-speech`;
//! this crate is the transport and lifecycle layer plus the composition
//! root (`bootstrap`).

#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Used by the main.rs binary
use clap as _;
use tracing_subscriber as _;

// Silence unused dev-dependency warnings for crates exercised only by the
// integration tests under tests/
#[cfg(test)]
use async_trait as _;
#[cfg(test)]
use http_body_util as _;
#[cfg(test)]
use mockall as _;
#[cfg(test)]
use tower as _;

pub mod bootstrap;
pub mod call_ws;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod outbound;
pub mod routes;
pub mod state;

// Re-export primary types
pub use bootstrap::{AxumContext, CallDirectory, CorsConfig, ServerConfig, bootstrap, start_server};
pub use error::HttpError;
pub use hub::{CallHub, HubCommand, JoinAccepted};
pub use outbound::{Outbound, OutboundQueue, OutboundReceiver, PushOutcome};
pub use routes::create_router;
pub use state::AppState;
