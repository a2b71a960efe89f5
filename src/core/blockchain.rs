//! Chain state: the block sequence, the UTXO set derived from it, and the
//! pool of pending transactions.
//!
//! All three live behind one lock on the control plane. Every mutation
//! (appending a block, replacing the chain, admitting a pooled transaction)
//! goes through the methods here and keeps the three consistent.

use tracing::{debug, info};

use crate::core::block::{Block, GENESIS};
use crate::core::pool::TransactionPool;
use crate::core::transaction::{Transaction, UnspentTxOut};

/// Target seconds between blocks.
pub const BLOCK_GENERATION_INTERVAL: i64 = 10;

/// Blocks between difficulty adjustments.
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 10;

/// Everything `Block::find` needs, snapshotted from the chain tip so mining
/// can run off the control plane.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub index: u64,
    pub previous_hash: Vec<u8>,
    pub timestamp: i64,
    pub data: Vec<Transaction>,
    pub difficulty: u32,
}

impl BlockTemplate {
    pub fn mine(self) -> Block {
        Block::find(
            self.index,
            Some(self.previous_hash),
            self.timestamp,
            self.data,
            self.difficulty,
        )
    }
}

pub struct Blockchain {
    blocks: Vec<Block>,
    unspent_tx_outs: Vec<UnspentTxOut>,
    tx_pool: TransactionPool,
}

impl Blockchain {
    pub fn new() -> Blockchain {
        Blockchain {
            blocks: vec![GENESIS.clone()],
            unspent_tx_outs: vec![],
            tx_pool: TransactionPool::new(),
        }
    }

    pub fn get_blocks(&self) -> &[Block] {
        self.blocks.as_slice()
    }

    pub fn get_latest(&self) -> &Block {
        self.blocks.last().expect("chain always holds genesis")
    }

    pub fn get_unspent_tx_outs(&self) -> &[UnspentTxOut] {
        self.unspent_tx_outs.as_slice()
    }

    pub fn get_tx_pool(&self) -> &TransactionPool {
        &self.tx_pool
    }

    /// Validates a candidate chain and derives the UTXO set it produces.
    /// Returns `None` when the genesis is wrong, any link fails block
    /// validation, or any block carries invalid transactions.
    pub fn is_valid_chain(blocks: &[Block]) -> Option<Vec<UnspentTxOut>> {
        match blocks.first() {
            Some(first) if first.is_genesis() => {}
            _ => {
                debug!("invalid genesis block");
                return None;
            }
        }
        let mut unspent_tx_outs = vec![];
        for (i, block) in blocks.iter().enumerate() {
            if i > 0 && !blocks[i - 1].is_valid_next(block) {
                debug!("block #{} is not valid", i);
                return None;
            }
            unspent_tx_outs = Transaction::process_transactions(
                block.get_data(),
                &unspent_tx_outs,
                block.get_index(),
            )?;
        }
        Some(unspent_tx_outs)
    }

    /// Appends a block to the tip. The block must be a valid successor and
    /// its transactions must process cleanly against the current UTXO set;
    /// on success the UTXO set is committed and the pool pruned.
    pub fn add_block(&mut self, block: Block) -> bool {
        if !self.get_latest().is_valid_next(&block) {
            return false;
        }
        let updated = match Transaction::process_transactions(
            block.get_data(),
            &self.unspent_tx_outs,
            block.get_index(),
        ) {
            Some(updated) => updated,
            None => return false,
        };
        info!(
            "appending block {} with {} transactions",
            block.get_index(),
            block.get_data().len()
        );
        self.blocks.push(block);
        self.unspent_tx_outs = updated;
        self.tx_pool.update(&self.unspent_tx_outs);
        true
    }

    /// Longest-chain rule: adopts `new_blocks` when it is a valid chain
    /// strictly longer than ours. The UTXO set is re-derived from the new
    /// chain and the pool pruned against it.
    pub fn replace(&mut self, new_blocks: Vec<Block>) -> bool {
        let derived = match Blockchain::is_valid_chain(&new_blocks) {
            Some(derived) if new_blocks.len() > self.blocks.len() => derived,
            _ => {
                info!("received blockchain is invalid or not longer, keeping ours");
                return false;
            }
        };
        info!(
            "replacing current blockchain with received chain of {} blocks",
            new_blocks.len()
        );
        self.blocks = new_blocks;
        self.unspent_tx_outs = derived;
        self.tx_pool.update(&self.unspent_tx_outs);
        true
    }

    /// Validates a received transaction and admits it to the pool.
    pub fn handle_received_transaction(&mut self, transaction: Transaction) -> bool {
        self.tx_pool.add(transaction, &self.unspent_tx_outs)
    }

    /// The difficulty the next block must satisfy. Re-targeted every
    /// `DIFFICULTY_ADJUSTMENT_INTERVAL` blocks, otherwise the tip's.
    pub fn get_difficulty(&self) -> u32 {
        let latest = self.get_latest();
        if latest.get_index() % DIFFICULTY_ADJUSTMENT_INTERVAL == 0 && latest.get_index() != 0 {
            self.get_adjusted_difficulty()
        } else {
            latest.get_difficulty()
        }
    }

    /// Compares the time the last adjustment window actually took against
    /// the expected time: twice too fast raises difficulty by one, twice too
    /// slow lowers it by one (never below zero).
    fn get_adjusted_difficulty(&self) -> u32 {
        let window = DIFFICULTY_ADJUSTMENT_INTERVAL as usize;
        let prev_adjustment = &self.blocks[self.blocks.len().saturating_sub(window)];
        let latest = self.get_latest();
        let time_expected = BLOCK_GENERATION_INTERVAL * DIFFICULTY_ADJUSTMENT_INTERVAL as i64;
        let time_taken = latest.get_timestamp() - prev_adjustment.get_timestamp();
        debug!(
            "difficulty adjustment: time_taken = {}, time_expected = {}",
            time_taken, time_expected
        );
        if time_taken < time_expected / 2 {
            prev_adjustment.get_difficulty() + 1
        } else if time_taken > time_expected * 2 {
            prev_adjustment.get_difficulty().saturating_sub(1)
        } else {
            prev_adjustment.get_difficulty()
        }
    }

    /// Snapshot of everything needed to mine the next block on top of the
    /// current tip.
    pub fn next_block_template(&self, data: Vec<Transaction>) -> BlockTemplate {
        let latest = self.get_latest();
        BlockTemplate {
            index: latest.get_index() + 1,
            previous_hash: latest.get_hash().to_vec(),
            timestamp: chrono::Utc::now().timestamp(),
            data,
            difficulty: self.get_difficulty(),
        }
    }

    // Queries backing the operator surface.

    pub fn get_block_with_hash(&self, hash: &[u8]) -> Option<&Block> {
        self.blocks.iter().find(|block| block.get_hash() == hash)
    }

    pub fn get_transaction_with_id(&self, id: &[u8]) -> Option<&Transaction> {
        self.blocks
            .iter()
            .flat_map(|block| block.get_data())
            .find(|tx| tx.get_id() == id)
    }

    pub fn unspent_tx_outs_for_address(&self, address: &[u8]) -> Vec<UnspentTxOut> {
        self.unspent_tx_outs
            .iter()
            .filter(|u| u.get_address() == address)
            .cloned()
            .collect()
    }

    /// Unspent outputs of `address` that no pooled transaction already
    /// spends.
    pub fn my_unspent_tx_outs(&self, address: &[u8]) -> Vec<UnspentTxOut> {
        self.tx_pool
            .filtered_unspent_tx_outs(&self.unspent_tx_outs)
            .into_iter()
            .filter(|u| u.get_address() == address)
            .collect()
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}
