use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, Utf8Bytes};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;

use crate::config::RelayConfig;
use crate::connection_manager::{ConnectionHandle, ConnectionManager, DeliveryError};
use crate::metrics::RelayMetrics;

/// Maximum number of concurrent message sends
const MAX_CONCURRENT_SENDS: usize = 100;

/// Result of one broadcast pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastOutcome {
    /// Connections the pass attempted
    pub targets: usize,
    pub delivered: usize,
    /// Targets that started closing after the snapshot was taken
    pub skipped: usize,
    pub failed: usize,
    /// Failed targets this pass removed from the registry
    pub pruned: usize,
}

/// Statistics for the broadcaster
#[derive(Debug, Default)]
pub struct RelayStats {
    pub messages_relayed: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_failed: AtomicU64,
    pub total_pruned: AtomicU64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_pruned: self.total_pruned.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of broadcaster statistics
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatsSnapshot {
    pub messages_relayed: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub total_pruned: u64,
}

/// Per-pass bookkeeping
#[derive(Default)]
struct PassTally {
    delivered: usize,
    skipped: usize,
    failed: Vec<Arc<ConnectionHandle>>,
}

impl PassTally {
    fn record(&mut self, conn: Arc<ConnectionHandle>, result: Result<(), DeliveryError>) {
        match result {
            Ok(()) => self.delivered += 1,
            // Already on its way out; its own task handles the close
            Err(DeliveryError::NotOpen(state)) => {
                tracing::debug!(connection_id = %conn.id, state = %state, "Skipping closing connection");
                self.skipped += 1;
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %conn.id,
                    error = %e,
                    "Broadcast delivery failed"
                );
                self.failed.push(conn);
            }
        }
    }
}

/// Fans each inbound message out to every registered connection
pub struct Broadcaster {
    connection_manager: Arc<ConnectionManager>,
    echo_to_sender: bool,
    send_timeout: Duration,
    stats: RelayStats,
}

impl Broadcaster {
    pub fn new(connection_manager: Arc<ConnectionManager>, config: &RelayConfig) -> Self {
        Self {
            connection_manager,
            echo_to_sender: config.echo_to_sender,
            send_timeout: config.send_timeout(),
            stats: RelayStats::default(),
        }
    }

    pub fn echo_to_sender(&self) -> bool {
        self.echo_to_sender
    }

    /// Get broadcaster statistics
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Deliver `message` to every registered connection.
    ///
    /// The sender is a target too unless echo is disabled. A failed delivery
    /// never stops the pass; failed targets are pruned once it completes.
    /// The outcome is for logging and stats, never reported to the sender.
    #[tracing::instrument(
        name = "relay.broadcast",
        skip(self, message, sender),
        fields(
            connection_id = %sender.id,
            message_len = message.as_str().len()
        )
    )]
    pub async fn broadcast(&self, message: Utf8Bytes, sender: &ConnectionHandle) -> BroadcastOutcome {
        let targets: Vec<Arc<ConnectionHandle>> = self
            .connection_manager
            .snapshot()
            .into_iter()
            .filter(|conn| conn.is_open())
            .filter(|conn| self.echo_to_sender || conn.id != sender.id)
            .collect();

        let target_count = targets.len();
        let tally = self.send_to_connections(targets, &message).await;
        let pruned = self.prune(&tally.failed);

        let outcome = BroadcastOutcome {
            targets: target_count,
            delivered: tally.delivered,
            skipped: tally.skipped,
            failed: tally.failed.len(),
            pruned,
        };

        // Update stats
        self.stats.messages_relayed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_delivered
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.stats
            .total_failed
            .fetch_add(outcome.failed as u64, Ordering::Relaxed);
        self.stats
            .total_pruned
            .fetch_add(outcome.pruned as u64, Ordering::Relaxed);

        // Update Prometheus metrics
        RelayMetrics::record_pass(
            outcome.targets,
            outcome.delivered as u64,
            outcome.failed as u64,
            outcome.pruned as u64,
        );

        tracing::debug!(
            targets = outcome.targets,
            delivered = outcome.delivered,
            skipped = outcome.skipped,
            failed = outcome.failed,
            pruned = outcome.pruned,
            "Broadcast pass complete"
        );

        outcome
    }

    /// Send to every target with bounded parallelism
    async fn send_to_connections(
        &self,
        connections: Vec<Arc<ConnectionHandle>>,
        message: &Utf8Bytes,
    ) -> PassTally {
        let mut tally = PassTally::default();
        let mut futures = FuturesUnordered::new();
        let send_timeout = self.send_timeout;

        for conn in connections {
            let msg = message.clone();
            futures.push(async move {
                let result = conn.send_text(msg, send_timeout).await;
                (conn, result)
            });

            // Process completed futures when we hit the concurrency limit
            while futures.len() >= MAX_CONCURRENT_SENDS {
                match futures.next().await {
                    Some((conn, result)) => tally.record(conn, result),
                    None => break,
                }
            }
        }

        // Process remaining futures
        while let Some((conn, result)) = futures.next().await {
            tally.record(conn, result);
        }

        tally
    }

    /// Drop failed targets from the registry and ask their tasks to close
    fn prune(&self, failed: &[Arc<ConnectionHandle>]) -> usize {
        let mut pruned = 0;

        for conn in failed {
            if self.connection_manager.unregister(conn.id) {
                pruned += 1;
                tracing::info!(connection_id = %conn.id, "Pruned connection after failed delivery");
            }
            conn.request_close(close_code::ERROR);
        }

        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::ConnectionState;
    use crate::websocket::OutboundMessage;
    use tokio::sync::mpsc;

    fn create_broadcaster(echo_to_sender: bool) -> (Arc<ConnectionManager>, Broadcaster) {
        let manager = Arc::new(ConnectionManager::new());
        let config = RelayConfig {
            echo_to_sender,
            send_timeout_ms: 50,
            ..RelayConfig::default()
        };
        let broadcaster = Broadcaster::new(manager.clone(), &config);
        (manager, broadcaster)
    }

    fn connect(
        manager: &ConnectionManager,
        buffer: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = Arc::new(ConnectionHandle::new(tx, None));
        manager.register(handle.clone());
        (handle, rx)
    }

    fn drain_texts(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Some(text) = msg.as_text() {
                texts.push(text.to_string());
            }
        }
        texts
    }

    #[tokio::test]
    async fn test_singleton_echoes_to_sender() {
        let (manager, broadcaster) = create_broadcaster(true);
        let (a, mut a_rx) = connect(&manager, 8);

        let outcome = broadcaster.broadcast("hello".into(), &a).await;

        assert_eq!(outcome.targets, 1);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(drain_texts(&mut a_rx), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_every_member_receives_exactly_once() {
        let (manager, broadcaster) = create_broadcaster(true);
        let (sender, mut sender_rx) = connect(&manager, 8);
        let mut others: Vec<_> = (0..5).map(|_| connect(&manager, 8)).collect();

        let outcome = broadcaster.broadcast("world".into(), &sender).await;

        assert_eq!(outcome.targets, 6);
        assert_eq!(outcome.delivered, 6);
        assert_eq!(outcome.failed, 0);
        assert_eq!(drain_texts(&mut sender_rx), vec!["world"]);
        for (_, rx) in others.iter_mut() {
            assert_eq!(drain_texts(rx), vec!["world"]);
        }
    }

    #[tokio::test]
    async fn test_echo_disabled_skips_sender() {
        let (manager, broadcaster) = create_broadcaster(false);
        let (sender, mut sender_rx) = connect(&manager, 8);
        let (_peer, mut peer_rx) = connect(&manager, 8);

        let outcome = broadcaster.broadcast("hi".into(), &sender).await;

        assert_eq!(outcome.targets, 1);
        assert!(drain_texts(&mut sender_rx).is_empty());
        assert_eq!(drain_texts(&mut peer_rx), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_broken_member_is_pruned_and_others_still_receive() {
        let (manager, broadcaster) = create_broadcaster(true);
        let (sender, mut sender_rx) = connect(&manager, 8);
        let (broken, broken_rx) = connect(&manager, 8);
        let (_peer, mut peer_rx) = connect(&manager, 8);
        drop(broken_rx);

        let outcome = broadcaster.broadcast("ping".into(), &sender).await;

        assert_eq!(outcome.targets, 3);
        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.pruned, 1);
        assert!(!manager.contains(broken.id));
        assert_eq!(manager.len(), 2);
        assert_eq!(drain_texts(&mut sender_rx), vec!["ping"]);
        assert_eq!(drain_texts(&mut peer_rx), vec!["ping"]);

        // The owning task is told to shut the connection down
        let code = tokio::time::timeout(Duration::from_secs(1), broken.close_requested())
            .await
            .unwrap();
        assert_eq!(code, close_code::ERROR);
    }

    #[tokio::test]
    async fn test_stalled_member_times_out_and_is_pruned() {
        let (manager, broadcaster) = create_broadcaster(true);
        let (sender, _sender_rx) = connect(&manager, 8);
        // Queue of one that nobody drains
        let (stalled, _stalled_rx) = connect(&manager, 1);

        broadcaster.broadcast("one".into(), &sender).await;
        let outcome = broadcaster.broadcast("two".into(), &sender).await;

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.pruned, 1);
        assert!(!manager.contains(stalled.id));
    }

    #[tokio::test]
    async fn test_closed_connection_is_never_targeted() {
        let (manager, broadcaster) = create_broadcaster(true);
        let (sender, _sender_rx) = connect(&manager, 8);
        let (closed, mut closed_rx) = connect(&manager, 8);

        closed.transition(ConnectionState::Closing);
        manager.unregister(closed.id);
        closed.transition(ConnectionState::Closed);

        let outcome = broadcaster.broadcast("after".into(), &sender).await;

        assert_eq!(outcome.targets, 1);
        assert_eq!(outcome.failed, 0);
        assert!(drain_texts(&mut closed_rx).is_empty());
    }

    #[tokio::test]
    async fn test_fanout_beyond_concurrency_limit() {
        let (manager, broadcaster) = create_broadcaster(true);
        let (sender, _sender_rx) = connect(&manager, 8);
        let mut receivers: Vec<_> = (0..MAX_CONCURRENT_SENDS + 20)
            .map(|_| connect(&manager, 2))
            .collect();

        let outcome = broadcaster.broadcast("bulk".into(), &sender).await;

        assert_eq!(outcome.delivered, MAX_CONCURRENT_SENDS + 21);
        for (_, rx) in receivers.iter_mut() {
            assert_eq!(drain_texts(rx), vec!["bulk"]);
        }
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let (manager, broadcaster) = create_broadcaster(true);
        let (sender, _sender_rx) = connect(&manager, 8);
        let (_gone, gone_rx) = connect(&manager, 8);
        drop(gone_rx);

        broadcaster.broadcast("a".into(), &sender).await;
        broadcaster.broadcast("b".into(), &sender).await;

        let stats = broadcaster.stats();
        assert_eq!(stats.messages_relayed, 2);
        assert_eq!(stats.total_delivered, 2);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.total_pruned, 1);
    }

    #[tokio::test]
    async fn test_target_closing_mid_pass_is_skipped_not_failed() {
        let manager = Arc::new(ConnectionManager::new());
        let (closing, _closing_rx) = connect(&manager, 8);
        closing.transition(ConnectionState::Closing);

        let mut tally = PassTally::default();
        let result = closing
            .send_text("late".into(), Duration::from_millis(50))
            .await;
        tally.record(closing.clone(), result);

        assert_eq!(tally.skipped, 1);
        assert_eq!(tally.delivered, 0);
        assert!(tally.failed.is_empty());
    }
}
