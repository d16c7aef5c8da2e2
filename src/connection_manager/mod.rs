//! Connection registry for WebSocket clients
//!
//! This module provides:
//! - Connection handles and their lifecycle state
//! - The concurrency-safe registry of live connections
//! - Connection statistics

mod registry;
mod stats;
mod types;

pub use registry::ConnectionManager;
pub use stats::{ConnectionInfo, ConnectionStats};
pub use types::{ConnectionHandle, ConnectionState, DeliveryError};
