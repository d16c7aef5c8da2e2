//! Broadcast fan-out of client messages to the connection registry

mod broadcast;

pub use broadcast::{BroadcastOutcome, Broadcaster, RelayStats, RelayStatsSnapshot};
