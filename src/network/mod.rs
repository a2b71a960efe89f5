// Gossip: wire messages, the peer registry, the protocol engine and the
// TCP transport carrying it.
pub mod engine;
pub mod message;
pub mod peers;
pub mod server;

pub use engine::GossipEngine;
pub use message::Message;
pub use peers::{PeerHandle, PeerRegistry};
pub use server::{connect_to_peer, start_p2p_server};
