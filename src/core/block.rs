//! Blocks: hashing, proof-of-work mining and validation.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::transaction::Transaction;
use crate::core::{hex_bytes, hex_bytes_opt};
use crate::crypto::{self, HASH_LENGTH};

/// Largest allowed drift, in seconds, of a block's timestamp behind its
/// predecessor or ahead of the local clock.
const TIMESTAMP_TOLERANCE: i64 = 60;

/// The fixed first block every chain starts from.
pub static GENESIS: Lazy<Block> = Lazy::new(|| Block::new(0, None, 1528359030, vec![], 0, 0));

/// A consensus unit: links to its predecessor by hash and commits to a
/// transaction list, a difficulty and the nonce that satisfies it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    index: u64,
    #[serde(with = "hex_bytes_opt")]
    previous_hash: Option<Vec<u8>>,
    timestamp: i64,
    data: Vec<Transaction>,
    difficulty: u32,
    nonce: u64,
    #[serde(with = "hex_bytes")]
    hash: Vec<u8>,
}

impl Block {
    pub fn new(
        index: u64,
        previous_hash: Option<Vec<u8>>,
        timestamp: i64,
        data: Vec<Transaction>,
        difficulty: u32,
        nonce: u64,
    ) -> Block {
        let hash = Block::calculate_hash(
            index,
            previous_hash.as_deref(),
            timestamp,
            &data,
            difficulty,
            nonce,
        );
        Block {
            index,
            previous_hash,
            timestamp,
            data,
            difficulty,
            nonce,
            hash,
        }
    }

    /// SHA-256 over the header fields as 8-byte big-endian integers, the
    /// previous hash when present, and the ids of the carried transactions.
    pub fn calculate_hash(
        index: u64,
        previous_hash: Option<&[u8]>,
        timestamp: i64,
        data: &[Transaction],
        difficulty: u32,
        nonce: u64,
    ) -> Vec<u8> {
        let mut context = ring::digest::Context::new(&ring::digest::SHA256);
        context.update(&index.to_be_bytes());
        if let Some(previous_hash) = previous_hash {
            context.update(previous_hash);
        }
        context.update(&(timestamp as u64).to_be_bytes());
        for tx in data {
            context.update(tx.get_id());
        }
        context.update(&(difficulty as u64).to_be_bytes());
        context.update(&nonce.to_be_bytes());
        context.finish().as_ref().to_vec()
    }

    fn calculate_hash_for_block(&self) -> Vec<u8> {
        Block::calculate_hash(
            self.index,
            self.previous_hash.as_deref(),
            self.timestamp,
            &self.data,
            self.difficulty,
            self.nonce,
        )
    }

    /// Mines a block: iterates nonces from zero until the block hash carries
    /// at least `difficulty` leading zero bits. Pure and CPU-bound; callers
    /// run it off the control plane.
    pub fn find(
        index: u64,
        previous_hash: Option<Vec<u8>>,
        timestamp: i64,
        data: Vec<Transaction>,
        difficulty: u32,
    ) -> Block {
        let mut nonce = 0u64;
        loop {
            let hash = Block::calculate_hash(
                index,
                previous_hash.as_deref(),
                timestamp,
                &data,
                difficulty,
                nonce,
            );
            if Block::hash_matches_difficulty(&hash, difficulty) {
                return Block {
                    index,
                    previous_hash,
                    timestamp,
                    data,
                    difficulty,
                    nonce,
                    hash,
                };
            }
            nonce += 1;
        }
    }

    pub fn hash_matches_difficulty(hash: &[u8], difficulty: u32) -> bool {
        crypto::leading_zero_bits(hash) >= difficulty
    }

    pub fn is_genesis(&self) -> bool {
        *self == *GENESIS
    }

    pub fn get_index(&self) -> u64 {
        self.index
    }

    pub fn get_previous_hash(&self) -> Option<&[u8]> {
        self.previous_hash.as_deref()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_data(&self) -> &[Transaction] {
        self.data.as_slice()
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn has_valid_structure(&self) -> bool {
        self.hash.len() == HASH_LENGTH
            && self
                .previous_hash
                .as_ref()
                .map(|h| h.len() == HASH_LENGTH)
                .unwrap_or(true)
            && self.data.iter().all(Transaction::has_valid_structure)
    }

    fn has_valid_hash(&self) -> bool {
        if self.calculate_hash_for_block() != self.hash {
            debug!("invalid hash at block {}", self.index);
            return false;
        }
        if !Block::hash_matches_difficulty(&self.hash, self.difficulty) {
            debug!(
                "block difficulty not satisfied, expected {} leading zero bits",
                self.difficulty
            );
            return false;
        }
        true
    }

    /// A block may lag up to a minute behind its predecessor and run up to a
    /// minute ahead of the local clock.
    fn has_valid_timestamp(&self, previous: &Block) -> bool {
        previous.timestamp - self.timestamp < TIMESTAMP_TOLERANCE
            && self.timestamp - chrono::Utc::now().timestamp() < TIMESTAMP_TOLERANCE
    }

    /// Validates `next` as the direct successor of `self`: structure, index
    /// continuity, hash linkage, timestamp drift, and the proof of work.
    pub fn is_valid_next(&self, next: &Block) -> bool {
        if !next.has_valid_structure() {
            debug!("invalid structure at block {}", next.index);
            return false;
        }
        if self.index + 1 != next.index {
            debug!("invalid index at block {}", next.index);
            return false;
        }
        if next.previous_hash.as_deref() != Some(self.hash.as_slice()) {
            debug!("invalid previous hash at block {}", next.index);
            return false;
        }
        if !next.has_valid_timestamp(self) {
            debug!("invalid timestamp at block {}", next.index);
            return false;
        }
        next.has_valid_hash()
    }
}
