//! The gossip engine: the per-peer protocol state machine.
//!
//! Reconciles local chain state with peers through block and pool exchange.
//! Replies go to the peer that asked; novel state is broadcast to everyone.
//! Protocol violations are logged and the offending frame dropped; the peer
//! stays connected.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use crate::core::block::Block;
use crate::core::blockchain::Blockchain;
use crate::network::message::Message;
use crate::network::peers::{PeerHandle, PeerRegistry};
use crate::node::{ChainEvent, Node};

#[derive(Clone)]
pub struct GossipEngine {
    chain: Arc<Mutex<Blockchain>>,
    peers: Arc<PeerRegistry>,
}

impl GossipEngine {
    pub fn new(node: &Node, peers: Arc<PeerRegistry>) -> GossipEngine {
        GossipEngine {
            chain: node.chain().clone(),
            peers,
        }
    }

    pub fn register_peer(&self, peer: PeerHandle) {
        self.peers.register(peer);
    }

    pub fn unregister_peer(&self, addr: &str) {
        self.peers.unregister(addr);
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.peers()
    }

    /// A fresh connection starts by asking the peer for its tip.
    pub fn handle_open(&self, peer: &PeerHandle) {
        peer.send(&Message::QueryLatest);
    }

    /// Decodes and dispatches one transport frame from a peer.
    pub async fn handle_frame(&self, peer: &PeerHandle, frame: &str) {
        match Message::from_frame(frame) {
            Ok(message) => self.handle_message(peer, message).await,
            Err(e) => warn!("dropping invalid message from {}: {}", peer.addr(), e),
        }
    }

    pub async fn handle_message(&self, peer: &PeerHandle, message: Message) {
        match message {
            Message::QueryLatest => {
                let latest = self.chain.lock().await.get_latest().clone();
                peer.send(&Message::ResponseBlockchain(vec![latest]));
            }
            Message::QueryAll => {
                let blocks = self.chain.lock().await.get_blocks().to_vec();
                peer.send(&Message::ResponseBlockchain(blocks));
            }
            Message::QueryTransactionPool => {
                let transactions = self
                    .chain
                    .lock()
                    .await
                    .get_tx_pool()
                    .get_transactions()
                    .to_vec();
                peer.send(&Message::ResponseTransactionPool(transactions));
            }
            Message::ResponseBlockchain(blocks) => {
                self.handle_blockchain_response(blocks).await;
            }
            Message::ResponseTransactionPool(transactions) => {
                for transaction in transactions {
                    let added = self
                        .chain
                        .lock()
                        .await
                        .handle_received_transaction(transaction);
                    if added {
                        self.broadcast_pool().await;
                    }
                }
            }
        }
    }

    /// Reconciles a received chain fragment with ours: adopt a directly
    /// attachable tip, ask for the full chain when a single block does not
    /// attach, or attempt a full replacement.
    async fn handle_blockchain_response(&self, received: Vec<Block>) {
        let latest_received = match received.last() {
            Some(latest) => latest.clone(),
            None => {
                warn!("received block chain of size 0");
                return;
            }
        };
        if !latest_received.has_valid_structure() {
            warn!("received block structure is not valid");
            return;
        }

        let mut chain = self.chain.lock().await;
        let latest_held = chain.get_latest();
        if latest_received.get_index() <= latest_held.get_index() {
            info!("received blockchain is not longer than ours, doing nothing");
            return;
        }
        info!(
            "blockchain possibly behind, ours: {}, peer: {}",
            latest_held.get_index(),
            latest_received.get_index()
        );

        if latest_received.get_previous_hash() == Some(latest_held.get_hash()) {
            // One block behind: append it directly.
            if chain.add_block(latest_received) {
                drop(chain);
                self.broadcast_latest().await;
            }
        } else if received.len() == 1 {
            // More than one block behind: fetch the peer's full chain.
            drop(chain);
            self.peers.broadcast(&Message::QueryAll);
        } else if chain.replace(received) {
            drop(chain);
            self.broadcast_latest().await;
        }
    }

    /// Announces the current tip to every peer.
    pub async fn broadcast_latest(&self) {
        let latest = self.chain.lock().await.get_latest().clone();
        self.peers.broadcast(&Message::ResponseBlockchain(vec![latest]));
    }

    /// Announces the current transaction pool to every peer.
    pub async fn broadcast_pool(&self) {
        let transactions = self
            .chain
            .lock()
            .await
            .get_tx_pool()
            .get_transactions()
            .to_vec();
        self.peers
            .broadcast(&Message::ResponseTransactionPool(transactions));
    }

    /// Drains chain-change events emitted by the node facade into broadcasts.
    /// This is the only coupling between the domain and the transport.
    pub async fn run_event_pump(self, mut events: mpsc::UnboundedReceiver<ChainEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ChainEvent::BroadcastLatest => self.broadcast_latest().await,
                ChainEvent::BroadcastPool => self.broadcast_pool().await,
            }
        }
    }
}
