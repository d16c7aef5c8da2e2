//! Connection statistics and info structures

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use uuid::Uuid;

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    /// Members still in the `open` state; the rest are mid-close
    pub open_connections: usize,
}

/// Per-connection summary for the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub peer_addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    pub state: String,
}
