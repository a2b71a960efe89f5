pub mod core;
pub use core::*;

pub mod crypto;
pub use crypto::{ADDRESS_LENGTH, HASH_LENGTH};

pub mod error;
pub use error::{NodeError, Result};

pub mod network;
pub use network::{GossipEngine, Message, PeerRegistry};

pub mod node;
pub use node::{ChainEvent, Node};

pub mod wallet;
pub use wallet::Wallet;

pub mod web;
// Not re-exported: when you use web types, it's clear they're from the
// web layer.
