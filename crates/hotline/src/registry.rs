//! Process-wide mapping of client ID to connection state.

use crate::models::{ClientConn, ClientIdAllocator};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Concurrent map keyed by 2-byte client ID. Backed by a `BTreeMap` so
/// `list()` is sorted by ID for free, matching the "deterministic ordering"
/// requirement without a separate sort step.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<BTreeMap<u16, Arc<ClientConn>>>,
    ids: ClientIdAllocator,
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        ClientRegistry { clients: RwLock::new(BTreeMap::new()), ids: ClientIdAllocator::new() }
    }

    /// Allocates the next ID and returns it; the caller constructs the
    /// `ClientConn` with this ID and then calls `insert`.
    pub fn next_id(&self) -> u16 {
        self.ids.next()
    }

    pub async fn insert(&self, conn: Arc<ClientConn>) {
        self.clients.write().await.insert(conn.id, conn);
    }

    /// Removes the entry. Handlers already holding an `Arc<ClientConn>` from
    /// before the removal keep a valid reference; only new lookups miss it.
    pub async fn remove(&self, id: u16) -> Option<Arc<ClientConn>> {
        self.clients.write().await.remove(&id)
    }

    pub async fn get(&self, id: u16) -> Option<Arc<ClientConn>> {
        self.clients.read().await.get(&id).cloned()
    }

    /// All connected clients, sorted by ID ascending.
    pub async fn list(&self) -> Vec<Arc<ClientConn>> {
        self.clients.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserFlags;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::sync::Mutex;

    fn test_conn(id: u16) -> Arc<ClientConn> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(ClientConn {
            id,
            icon: 0,
            flags: Mutex::new(UserFlags::empty()),
            user_name: Mutex::new(b"test".to_vec()),
            version: Some(190),
            account: Mutex::new(Arc::new(crate::models::Account::new(
                "guest",
                "Guest",
                "",
                crate::access::Access::EMPTY,
            ))),
            idle_time: Mutex::new(0),
            auto_reply: Mutex::new(Vec::new()),
            remote_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            outbox: tx,
            transfer_bucket: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn list_is_sorted_by_id() {
        let reg = ClientRegistry::new();
        reg.insert(test_conn(5)).await;
        reg.insert(test_conn(1)).await;
        reg.insert(test_conn(3)).await;
        let ids: Vec<u16> = reg.list().await.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn remove_drops_from_registry_but_not_outstanding_refs() {
        let reg = ClientRegistry::new();
        let conn = test_conn(7);
        reg.insert(conn.clone()).await;
        let removed = reg.remove(7).await;
        assert!(removed.is_some());
        assert!(reg.get(7).await.is_none());
        // `conn` here is the caller's own outstanding reference.
        assert_eq!(conn.id, 7);
    }

    #[test]
    fn allocator_never_returns_zero() {
        let alloc = ClientIdAllocator::new();
        for _ in 0..3 {
            assert_ne!(alloc.next(), 0);
        }
    }
}
