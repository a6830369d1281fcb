/// Connection registry — the hub's map of live peer connections.
///
/// An address is present iff a receive loop for it is running. All
/// mutation goes through the shared `RwLock`, so a routing pass always
/// observes a consistent snapshot and never races a removal.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};

use super::message::Message;

/// Command sent to the task that owns a peer's transport.
#[derive(Debug)]
pub enum PeerCommand {
    /// Write this message to the peer.
    Deliver(Message),
    /// Stop the receive loop and drop the transport.
    Close,
}

/// Handle to one live connection. The transport itself is owned by the
/// connection's task; everyone else talks to it through `tx`.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub connected_at: Instant,
    pub tx: mpsc::UnboundedSender<PeerCommand>,
}

impl PeerHandle {
    pub fn new(addr: SocketAddr, tx: mpsc::UnboundedSender<PeerCommand>) -> Self {
        Self {
            addr,
            connected_at: Instant::now(),
            tx,
        }
    }

    /// Queue a message for delivery. Fails only if the owning task is gone,
    /// which callers treat as "peer disconnected".
    pub fn deliver(&self, msg: Message) -> Result<(), ()> {
        self.tx.send(PeerCommand::Deliver(msg)).map_err(|_| ())
    }
}

/// Thread-safe map of peer address → live connection handle.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    peers: HashMap<SocketAddr, PeerHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handle: PeerHandle) {
        self.peers.insert(handle.addr, handle);
    }

    /// Remove an entry. Idempotent: the normal disconnect path and the
    /// error-cleanup path may race to remove the same address.
    pub fn remove(&mut self, addr: SocketAddr) -> Option<PeerHandle> {
        self.peers.remove(&addr)
    }

    pub fn get(&self, addr: SocketAddr) -> Option<&PeerHandle> {
        self.peers.get(&addr)
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.peers.contains_key(&addr)
    }

    /// Consistent snapshot of every live handle, for a routing pass.
    pub fn snapshot(&self) -> Vec<PeerHandle> {
        self.peers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Shared, thread-safe registry.
pub type SharedRegistry = Arc<RwLock<ConnectionRegistry>>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn handle(a: &str) -> PeerHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        PeerHandle::new(addr(a), tx)
    }

    #[test]
    fn add_then_contains() {
        let mut reg = ConnectionRegistry::new();
        reg.add(handle("10.0.0.1:5000"));
        assert!(reg.contains(addr("10.0.0.1:5000")));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut reg = ConnectionRegistry::new();
        reg.add(handle("10.0.0.1:5000"));
        assert!(reg.remove(addr("10.0.0.1:5000")).is_some());
        // Second removal of the same address is a no-op, not an error.
        assert!(reg.remove(addr("10.0.0.1:5000")).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn addresses_differing_only_by_port_are_distinct() {
        // Two connections from one host must not be conflated.
        let mut reg = ConnectionRegistry::new();
        reg.add(handle("10.0.0.1:5000"));
        reg.add(handle("10.0.0.1:5001"));
        assert_eq!(reg.len(), 2);
        reg.remove(addr("10.0.0.1:5000"));
        assert!(reg.contains(addr("10.0.0.1:5001")));
    }

    #[test]
    fn snapshot_is_detached_from_later_mutation() {
        let mut reg = ConnectionRegistry::new();
        reg.add(handle("10.0.0.1:5000"));
        reg.add(handle("10.0.0.2:5000"));
        let snap = reg.snapshot();
        reg.remove(addr("10.0.0.1:5000"));
        assert_eq!(snap.len(), 2);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn deliver_fails_when_owner_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let h = PeerHandle::new(addr("10.0.0.1:5000"), tx);
        drop(rx);
        assert!(h.deliver(Message::broadcast("hi")).is_err());
    }
}
