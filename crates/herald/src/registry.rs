//! Client id to live connection index.
//!
//! At most one connection per client id. A newer registration replaces the
//! older one, and an old connection unregistering late never evicts its
//! replacement.

use crate::connection::ConnectionHandle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Shared registry of authenticated connections, keyed by client id.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<String, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` for `client_id`, returning the handle it
    /// displaced, if any.
    pub fn register(&self, client_id: &str, connection: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.inner.write().insert(client_id.to_string(), connection);
        if let Some(previous) = &previous {
            debug!(
                client_id,
                replaced_connection = previous.id(),
                "client reconnected, replacing registry entry"
            );
        }
        previous
    }

    /// Remove the entry for `client_id` only if it still points at
    /// `connection_id`. Returns whether an entry was removed.
    pub fn unregister(&self, client_id: &str, connection_id: &str) -> bool {
        let mut map = self.inner.write();
        match map.get(client_id) {
            Some(current) if current.id() == connection_id => {
                map.remove(client_id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, client_id: &str) -> Option<ConnectionHandle> {
        self.inner.read().get(client_id).cloned()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.inner.read().contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection;
    use crate::error::TransportError;
    use crate::transport::{InboundStream, OutboundSink};
    use futures::channel::mpsc;
    use futures::{SinkExt, StreamExt};
    use std::time::Duration;

    fn connection() -> ConnectionHandle {
        let (out_tx, _out_rx) = mpsc::unbounded::<String>();
        let (_in_tx, in_rx) = mpsc::unbounded::<String>();
        let sink: OutboundSink = Box::pin(out_tx.sink_map_err(|_| TransportError::Closed));
        let stream: InboundStream = Box::pin(in_rx.map(Ok::<String, TransportError>));
        let (handle, _inbound) = connection::spawn(sink, stream, Duration::from_millis(100));
        handle
    }

    #[tokio::test]
    async fn test_register_replaces_previous() {
        let registry = ConnectionRegistry::new();
        let first = connection();
        let second = connection();

        assert!(registry.register("c1", first.clone()).is_none());
        let displaced = registry.register("c1", second.clone()).unwrap();
        assert_eq!(displaced.id(), first.id());
        assert_eq!(registry.get("c1").unwrap().id(), second.id());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_replacement() {
        let registry = ConnectionRegistry::new();
        let first = connection();
        let second = connection();

        registry.register("c1", first.clone());
        registry.register("c1", second.clone());

        assert!(!registry.unregister("c1", first.id()));
        assert!(registry.contains("c1"));

        assert!(registry.unregister("c1", second.id()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_unknown_client_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.unregister("ghost", "nope"));
    }
}
