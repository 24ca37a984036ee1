// ============================
// relay-backend/src/registry.rs
// ============================
//! Connection registry and the unicast/broadcast delivery primitives.
//!
//! Every open socket registers the sending half of its outbound queue under a
//! [`ConnectionId`]. Delivery never waits: a full or closed queue means the
//! frame is lost, which is the delivery contract for signaling.
use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use relay_common::{ConnectionId, ServerMessage};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::metrics::{RELAY_DROPPED, RELAY_SENT};

/// Frame queued for a socket's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialized envelope
    Text(String),
    /// Close the socket
    Close,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection {0} is not open")]
    NotConnected(ConnectionId),

    #[error("connection {0} closed its outbound queue")]
    Closed(ConnectionId),

    #[error("outbound queue of connection {0} is full")]
    Full(ConnectionId),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Process-wide table of open connections
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, mpsc::Sender<Outbound>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: ConnectionId, tx: mpsc::Sender<Outbound>) {
        self.connections.insert(connection_id, tx);
        debug!(%connection_id, "connection registered");
    }

    pub fn unregister(&self, connection_id: ConnectionId) {
        if self.connections.remove(&connection_id).is_some() {
            debug!(%connection_id, "connection unregistered");
        }
    }

    pub fn is_connected(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    fn deliver(&self, connection_id: ConnectionId, frame: Outbound) -> Result<(), TransportError> {
        let tx = self
            .connections
            .get(&connection_id)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::NotConnected(connection_id))?;

        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full(connection_id),
            TrySendError::Closed(_) => TransportError::Closed(connection_id),
        })
    }

    /// Serialize and queue a message for one connection
    pub fn send(
        &self,
        connection_id: ConnectionId,
        msg: &ServerMessage,
    ) -> Result<(), TransportError> {
        let json = serde_json::to_string(msg)?;
        self.deliver(connection_id, Outbound::Text(json))
    }

    /// Fire-and-forget variant of [`send`](Self::send). Returns whether the frame was queued.
    pub fn unicast(&self, connection_id: ConnectionId, msg: &ServerMessage) -> bool {
        match self.send(connection_id, msg) {
            Ok(()) => {
                counter!(RELAY_SENT).increment(1);
                true
            },
            Err(e) => {
                counter!(RELAY_DROPPED).increment(1);
                debug!(%connection_id, error = %e, "unicast dropped");
                false
            },
        }
    }

    /// Deliver to every connection in `scope` except `origin`.
    /// Returns the number of connections the frame was queued for.
    pub fn broadcast<I>(&self, origin: Option<ConnectionId>, msg: &ServerMessage, scope: I) -> usize
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                debug!(error = %e, "broadcast dropped: serialization failed");
                return 0;
            },
        };

        let mut delivered = 0;
        for connection_id in scope {
            if Some(connection_id) == origin {
                continue;
            }
            match self.deliver(connection_id, Outbound::Text(json.clone())) {
                Ok(()) => {
                    counter!(RELAY_SENT).increment(1);
                    delivered += 1;
                },
                Err(e) => {
                    counter!(RELAY_DROPPED).increment(1);
                    debug!(%connection_id, error = %e, "broadcast target skipped");
                },
            }
        }
        delivered
    }

    /// Ask a connection's writer to close the socket and stop routing to it
    pub fn disconnect(&self, connection_id: ConnectionId) -> Result<(), TransportError> {
        let (_, tx) = self
            .connections
            .remove(&connection_id)
            .ok_or(TransportError::NotConnected(connection_id))?;
        tx.try_send(Outbound::Close).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full(connection_id),
            TrySendError::Closed(_) => TransportError::Closed(connection_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn connect(registry: &ConnectionRegistry) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(8);
        registry.register(id, tx);
        (id, rx)
    }

    #[test]
    fn test_unicast_to_closed_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.unicast(Uuid::new_v4(), &ServerMessage::NotFound));
    }

    #[test]
    fn test_unicast_serializes_envelope() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = connect(&registry);
        assert!(registry.unicast(id, &ServerMessage::NotFound));
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Text(r#"{"type":"NOT_FOUND"}"#.to_string())
        );
    }

    #[test]
    fn test_broadcast_skips_origin_and_outsiders() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = connect(&registry);
        let (b, mut rx_b) = connect(&registry);
        let (_outsider, mut rx_outsider) = connect(&registry);

        let msg = ServerMessage::UserLeft {
            user_id: "a".to_string(),
        };
        assert_eq!(registry.broadcast(Some(a), &msg, [a, b]), 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_outsider.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_frame() {
        let registry = ConnectionRegistry::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(1);
        registry.register(id, tx);

        assert!(registry.unicast(id, &ServerMessage::NotFound));
        assert!(matches!(
            registry.send(id, &ServerMessage::NotFound),
            Err(TransportError::Full(_))
        ));
    }

    #[test]
    fn test_disconnect() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = connect(&registry);

        registry.disconnect(id).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(!registry.is_connected(id));
        assert!(matches!(
            registry.disconnect(id),
            Err(TransportError::NotConnected(_))
        ));

        let (dead, rx_dead) = connect(&registry);
        drop(rx_dead);
        assert!(matches!(registry.disconnect(dead), Err(TransportError::Closed(_))));
    }
}
