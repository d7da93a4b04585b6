//! Connection identities and the storage-node registry
//!
//! Every accepted connection gets an opaque [`ConnId`] and an outbound
//! channel drained by its writer task. A connection becomes a storage node
//! when it sends `JOIN`; the registry maps its id to the announced port and
//! the channel used for `REMOVE` instructions.

use crate::common::protocol::Reply;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Outbound half of a connection.
pub type Outbox = mpsc::UnboundedSender<Reply>;

/// Opaque identifier of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ConnId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connected peer: client or storage node.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: ConnId,
    pub outbox: Outbox,
}

impl Peer {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            id: ConnId::next(),
            outbox,
        }
    }

    /// Queue a reply. Returns false if the connection is already gone.
    pub fn send(&self, reply: Reply) -> bool {
        self.outbox.send(reply).is_ok()
    }
}

/// A joined storage node.
#[derive(Debug, Clone)]
pub struct StorageNode {
    pub port: u16,
    pub outbox: Outbox,
}

/// Process-wide set of joined storage nodes.
#[derive(Debug, Default)]
pub struct Membership {
    nodes: DashMap<ConnId, StorageNode>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer` as a storage node listening on `port`.
    pub fn join(&self, peer: &Peer, port: u16) {
        let previous = self.nodes.insert(
            peer.id,
            StorageNode {
                port,
                outbox: peer.outbox.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::warn!(conn = %peer.id, old = previous.port, new = port, "Storage node re-joined");
        }
    }

    /// Deregister a connection. Returns the node if it had joined.
    pub fn leave(&self, id: ConnId) -> Option<StorageNode> {
        self.nodes.remove(&id).map(|(_, node)| node)
    }

    /// Number of joined nodes.
    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    /// Published port of a joined node.
    pub fn port_of(&self, id: ConnId) -> Option<u16> {
        self.nodes.get(&id).map(|node| node.port)
    }

    /// Ids of every joined node at this instant.
    pub fn snapshot(&self) -> Vec<ConnId> {
        self.nodes.iter().map(|entry| *entry.key()).collect()
    }

    /// Send an instruction to a joined node.
    pub fn send(&self, id: ConnId, reply: Reply) -> bool {
        match self.nodes.get(&id) {
            Some(node) => node.outbox.send(reply).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> (Peer, mpsc::UnboundedReceiver<Reply>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Peer::new(tx), rx)
    }

    #[test]
    fn test_conn_ids_are_unique() {
        let a = ConnId::next();
        let b = ConnId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_join_and_leave() {
        let registry = Membership::new();
        let (a, _rx_a) = peer();
        let (b, _rx_b) = peer();

        registry.join(&a, 4001);
        registry.join(&b, 4002);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.port_of(a.id), Some(4001));

        let node = registry.leave(a.id).unwrap();
        assert_eq!(node.port, 4001);
        assert_eq!(registry.count(), 1);
        assert!(registry.leave(a.id).is_none());
        assert_eq!(registry.port_of(a.id), None);
    }

    #[test]
    fn test_send_to_node() {
        let registry = Membership::new();
        let (a, mut rx) = peer();
        registry.join(&a, 4001);

        assert!(registry.send(a.id, Reply::Remove("f".into())));
        assert_eq!(rx.try_recv().unwrap(), Reply::Remove("f".into()));

        registry.leave(a.id);
        assert!(!registry.send(a.id, Reply::Remove("f".into())));
    }
}
