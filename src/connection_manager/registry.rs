use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use uuid::Uuid;

use crate::metrics::ConnectionMetrics;
use crate::notification::RecipientId;
use crate::websocket::OutboundMessage;

use super::{ConnectionHandle, ConnectionStats, ConnectionWriteError, DeliveryResult};

/// Default upper bound on a single outbound write
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

type ConnectionSet = HashMap<Uuid, Arc<ConnectionHandle>>;

/// Live connections grouped by recipient.
///
/// A recipient key is present only while it has at least one connection.
/// The map lock is held for map access only and never across a send.
pub struct ConnectionRegistry {
    recipients: Mutex<HashMap<RecipientId, ConnectionSet>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_send_timeout(DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_send_timeout(send_timeout: Duration) -> Self {
        Self {
            recipients: Mutex::new(HashMap::new()),
            send_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RecipientId, ConnectionSet>> {
        // Critical sections only touch the map, so a poisoned guard is still consistent
        self.recipients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection, moving it from `Connecting` to `Open`.
    ///
    /// Returns false (and registers nothing) if the connection was already
    /// closed before registration could happen.
    pub fn register(&self, handle: Arc<ConnectionHandle>) -> bool {
        let mut recipients = self.lock();
        if !handle.open() {
            tracing::debug!(
                connection_id = %handle.id,
                recipient = %handle.recipient,
                state = handle.state().as_str(),
                "Refusing to register connection that is not connecting"
            );
            return false;
        }

        let (total, first) = {
            let set = recipients.entry(handle.recipient.clone()).or_default();
            let first = set.is_empty();
            set.insert(handle.id, handle.clone());
            (set.len(), first)
        };
        drop(recipients);
        ConnectionMetrics::record_registered(first);

        tracing::info!(
            connection_id = %handle.id,
            recipient = %handle.recipient,
            recipient_connections = total,
            "Connection registered"
        );
        true
    }

    /// Remove a connection; the recipient key goes away with its last connection
    pub fn unregister(&self, recipient: &RecipientId, connection_id: Uuid) -> bool {
        let (removed, last) = {
            let mut recipients = self.lock();
            let Some(set) = recipients.get_mut(recipient) else {
                return false;
            };
            let removed = set.remove(&connection_id);
            let last = set.is_empty();
            if last {
                recipients.remove(recipient);
            }
            (removed, last)
        };

        match removed {
            Some(handle) => {
                ConnectionMetrics::record_unregistered(last);
                handle.begin_close();
                tracing::info!(
                    connection_id = %connection_id,
                    recipient = %recipient,
                    "Connection unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Snapshot of a recipient's connections
    pub fn connections_for(&self, recipient: &RecipientId) -> Vec<Arc<ConnectionHandle>> {
        self.lock()
            .get(recipient)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, recipient: &RecipientId) -> bool {
        self.lock().contains_key(recipient)
    }

    /// Snapshot of all recipients with at least one connection
    pub fn recipients(&self) -> Vec<RecipientId> {
        self.lock().keys().cloned().collect()
    }

    pub fn stats(&self) -> ConnectionStats {
        let recipients = self.lock();
        ConnectionStats {
            total_connections: recipients.values().map(HashMap::len).sum(),
            unique_recipients: recipients.len(),
        }
    }

    /// Fan a frame out to every connection of one recipient
    #[tracing::instrument(name = "registry.send_to", skip_all, fields(recipient = %recipient))]
    pub async fn send_to(&self, recipient: &RecipientId, message: OutboundMessage) -> DeliveryResult {
        let connections = self.connections_for(recipient);
        self.send_to_connections(&connections, &message).await
    }

    /// Fan a frame out to every live connection of every recipient
    #[tracing::instrument(name = "registry.broadcast", skip_all)]
    pub async fn broadcast(&self, message: OutboundMessage) -> DeliveryResult {
        let snapshot: Vec<Vec<Arc<ConnectionHandle>>> = self
            .lock()
            .values()
            .map(|set| set.values().cloned().collect())
            .collect();

        let deliveries = snapshot
            .iter()
            .map(|connections| self.send_to_connections(connections, &message));

        join_all(deliveries)
            .await
            .into_iter()
            .fold(DeliveryResult::default(), DeliveryResult::merge)
    }

    /// Send concurrently; every failed connection is unregistered and the rest still receive
    async fn send_to_connections(
        &self,
        connections: &[Arc<ConnectionHandle>],
        message: &OutboundMessage,
    ) -> DeliveryResult {
        if connections.is_empty() {
            return DeliveryResult::default();
        }

        let sends = connections.iter().map(|conn| {
            let message = message.clone();
            async move { (conn, conn.send(message, self.send_timeout).await) }
        });

        let mut result = DeliveryResult::default();
        for (conn, outcome) in join_all(sends).await {
            match outcome {
                Ok(()) => result.delivered_to += 1,
                Err(e) => {
                    result.failed += 1;
                    self.drop_failed(conn, &e);
                }
            }
        }
        result
    }

    fn drop_failed(&self, conn: &ConnectionHandle, error: &ConnectionWriteError) {
        tracing::warn!(
            connection_id = %conn.id,
            recipient = %conn.recipient,
            error = %error,
            "Write to connection failed, unregistering"
        );
        self.unregister(&conn.recipient, conn.id);
    }

    /// Remove entries whose connection is closing or whose writer has gone away.
    ///
    /// Returns the number of connections removed.
    pub fn prune_closed(&self) -> usize {
        let mut pruned = Vec::new();
        let emptied;
        {
            let mut recipients = self.lock();
            for set in recipients.values_mut() {
                set.retain(|_, conn| {
                    let dead = conn.is_orphaned() || !conn.is_open();
                    if dead {
                        pruned.push(conn.clone());
                    }
                    !dead
                });
            }
            let before = recipients.len();
            recipients.retain(|_, set| !set.is_empty());
            emptied = before - recipients.len();
        }
        ConnectionMetrics::record_pruned(pruned.len(), emptied);

        for conn in &pruned {
            conn.begin_close();
            tracing::warn!(
                connection_id = %conn.id,
                recipient = %conn.recipient,
                "Pruned registry entry without a live connection"
            );
        }
        pruned.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::ServerMessage;
    use tokio::sync::mpsc;

    fn connect(
        registry: &ConnectionRegistry,
        recipient: &str,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(8);
        let handle = Arc::new(ConnectionHandle::new(RecipientId::new(recipient), tx));
        assert!(registry.register(handle.clone()));
        (handle, rx)
    }

    fn pong() -> OutboundMessage {
        OutboundMessage::Raw(ServerMessage::Pong)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let (c1, _rx1) = connect(&registry, "u1");
        let (c2, _rx2) = connect(&registry, "u1");
        let (_c3, _rx3) = connect(&registry, "u2");

        let mut ids: Vec<Uuid> = registry
            .connections_for(&RecipientId::new("u1"))
            .iter()
            .map(|c| c.id)
            .collect();
        ids.sort();
        let mut expected = vec![c1.id, c2.id];
        expected.sort();
        assert_eq!(ids, expected);
        assert_eq!(
            registry.stats(),
            ConnectionStats {
                total_connections: 3,
                unique_recipients: 2
            }
        );
    }

    #[test]
    fn test_unregister_last_connection_removes_key() {
        let registry = ConnectionRegistry::new();
        let u1 = RecipientId::new("u1");
        let (c1, _rx) = connect(&registry, "u1");

        assert!(registry.unregister(&u1, c1.id));
        assert!(registry.connections_for(&u1).is_empty());
        assert!(!registry.contains(&u1));
        assert!(registry.recipients().is_empty());
        assert!(!registry.unregister(&u1, c1.id));
    }

    #[test]
    fn test_no_recipient_ever_maps_to_empty_set() {
        let registry = ConnectionRegistry::new();
        let mut live: Vec<(Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>)> = Vec::new();

        // Deterministic interleaving of registers and unregisters across three recipients
        for step in 0..60usize {
            let recipient = ["a", "b", "c"][step % 3];
            if step % 4 == 3 && !live.is_empty() {
                let (conn, _) = live.remove(step % live.len());
                registry.unregister(&conn.recipient, conn.id);
            } else {
                live.push(connect(&registry, recipient));
            }

            for key in registry.recipients() {
                assert!(!registry.connections_for(&key).is_empty());
            }
        }

        for (conn, _) in live.drain(..) {
            registry.unregister(&conn.recipient, conn.id);
        }
        assert!(registry.recipients().is_empty());
    }

    #[test]
    fn test_register_refuses_closed_connection() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let handle = Arc::new(ConnectionHandle::new(RecipientId::new("u1"), tx));
        handle.finish_close();

        assert!(!registry.register(handle));
        assert!(!registry.contains(&RecipientId::new("u1")));
    }

    #[tokio::test]
    async fn test_send_to_reaches_every_connection() {
        let registry = ConnectionRegistry::new();
        let mut receivers: Vec<_> = (0..4).map(|_| connect(&registry, "u1").1).collect();

        let result = registry.send_to(&RecipientId::new("u1"), pong()).await;
        assert_eq!(result, DeliveryResult::new(4, 0));
        for rx in receivers.iter_mut() {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[tokio::test]
    async fn test_failed_write_unregisters_only_that_connection() {
        let registry = ConnectionRegistry::new();
        let u1 = RecipientId::new("u1");
        let (c1, rx1) = connect(&registry, "u1");
        let (c2, mut rx2) = connect(&registry, "u1");
        drop(rx1);

        let result = registry.send_to(&u1, pong()).await;

        assert_eq!(result, DeliveryResult::new(1, 1));
        assert!(rx2.try_recv().is_ok());
        let remaining: Vec<Uuid> = registry.connections_for(&u1).iter().map(|c| c.id).collect();
        assert_eq!(remaining, vec![c2.id]);
        assert!(c1.state() >= crate::connection_manager::ConnectionState::Closing);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_recipients() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = connect(&registry, "a");
        let (_b, mut rx_b) = connect(&registry, "b");
        let (_c, rx_c) = connect(&registry, "c");
        drop(rx_c);

        let result = registry.broadcast(pong()).await;

        assert_eq!(result, DeliveryResult::new(2, 1));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(!registry.contains(&RecipientId::new("c")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connection_does_not_block_siblings() {
        let registry = ConnectionRegistry::with_send_timeout(Duration::from_millis(100));
        let u1 = RecipientId::new("u1");

        let (tx, _stalled_rx) = mpsc::channel(1);
        let stalled = Arc::new(ConnectionHandle::new(u1.clone(), tx));
        registry.register(stalled.clone());
        stalled.send(pong(), Duration::from_millis(1)).await.unwrap();

        let (_healthy, mut healthy_rx) = connect(&registry, "u1");

        let result = registry.send_to(&u1, pong()).await;
        assert_eq!(result, DeliveryResult::new(1, 1));
        assert!(healthy_rx.try_recv().is_ok());
        assert_eq!(registry.connections_for(&u1).len(), 1);
    }

    #[test]
    fn test_prune_closed_removes_orphans() {
        let registry = ConnectionRegistry::new();
        let (_c1, rx1) = connect(&registry, "u1");
        let (c2, _rx2) = connect(&registry, "u2");
        let (_c3, _rx3) = connect(&registry, "u2");
        drop(rx1);
        c2.begin_close();

        assert_eq!(registry.prune_closed(), 2);
        assert!(!registry.contains(&RecipientId::new("u1")));
        assert_eq!(registry.connections_for(&RecipientId::new("u2")).len(), 1);
        assert_eq!(registry.prune_closed(), 0);
    }
}
