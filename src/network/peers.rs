//! The peer registry: live peer channels and broadcast fan-out.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::network::message::Message;

/// A handle to one connected peer. Sending enqueues a frame on the peer's
/// outbox; the connection's writer task drains it, so a slow or dead peer
/// never blocks the control plane.
#[derive(Clone)]
pub struct PeerHandle {
    addr: String,
    outbox: mpsc::UnboundedSender<Arc<str>>,
}

impl PeerHandle {
    pub fn new(addr: String, outbox: mpsc::UnboundedSender<Arc<str>>) -> PeerHandle {
        PeerHandle { addr, outbox }
    }

    /// The transport-level address identifying this peer.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends a message to this peer. Delivery failures are tolerated
    /// silently; the disconnect path cleans the registry up.
    pub fn send(&self, message: &Message) {
        match message.to_frame() {
            Ok(frame) => {
                let _ = self.outbox.send(Arc::from(frame));
            }
            Err(e) => error!("failed to encode message: {}", e),
        }
    }

    fn send_prepared(&self, frame: Arc<str>) {
        let _ = self.outbox.send(frame);
    }
}

/// The set of live peers. Identity is the peer's transport address;
/// registering an address twice is a no-op.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, PeerHandle>>,
}

impl PeerRegistry {
    pub fn new() -> PeerRegistry {
        PeerRegistry {
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, peer: PeerHandle) {
        let mut peers = self.peers.write().expect("peer registry lock poisoned");
        if peers.contains_key(peer.addr()) {
            return;
        }
        info!("registered peer {}", peer.addr());
        peers.insert(peer.addr().to_string(), peer);
    }

    pub fn unregister(&self, addr: &str) {
        let mut peers = self.peers.write().expect("peer registry lock poisoned");
        if peers.remove(addr).is_some() {
            info!("unregistered peer {}", addr);
        }
    }

    pub fn peers(&self) -> Vec<String> {
        let peers = self.peers.read().expect("peer registry lock poisoned");
        peers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().expect("peer registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort fan-out: the frame is serialized once and the same buffer
    /// is shared across every recipient's outbox.
    pub fn broadcast(&self, message: &Message) {
        let frame: Arc<str> = match message.to_frame() {
            Ok(frame) => Arc::from(frame),
            Err(e) => {
                error!("failed to encode broadcast: {}", e);
                return;
            }
        };
        let peers = self.peers.read().expect("peer registry lock poisoned");
        for peer in peers.values() {
            peer.send_prepared(frame.clone());
        }
    }
}
