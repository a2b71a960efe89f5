//! Node facade - the single value wiring chain state, wallet and gossip.
//!
//! A `Node` is constructed once at bootstrap and cloned into every HTTP
//! handler and peer task; there is no process-wide mutable state. The chain
//! (blocks, UTXO set and pool) sits behind one async mutex, so every
//! mutation serializes on the control plane. Mining is the only CPU-bound
//! work: it runs on a blocking thread against a snapshot of the tip and its
//! result re-enters through the same `add_block` path as a block received
//! from a peer.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::info;

use crate::core::amount::Amount;
use crate::core::block::Block;
use crate::core::blockchain::Blockchain;
use crate::core::transaction::{Transaction, TxOut, UnspentTxOut};
use crate::error::{NodeError, Result};
use crate::wallet::Wallet;

/// Chain-state changes the gossip engine reacts to. The domain never talks
/// to the transport directly; it emits these and the gossip side fans out.
#[derive(Clone, Debug)]
pub enum ChainEvent {
    /// The tip advanced or the chain was replaced: announce the latest block.
    BroadcastLatest,
    /// The pool gained a transaction: announce the pool.
    BroadcastPool,
}

#[derive(Clone)]
pub struct Node {
    chain: Arc<Mutex<Blockchain>>,
    wallet: Arc<Wallet>,
    events: mpsc::UnboundedSender<ChainEvent>,
}

impl Node {
    pub fn new(wallet: Wallet, events: mpsc::UnboundedSender<ChainEvent>) -> Node {
        Node {
            chain: Arc::new(Mutex::new(Blockchain::new())),
            wallet: Arc::new(wallet),
            events,
        }
    }

    /// The shared chain handle; peer tasks lock it per message.
    pub fn chain(&self) -> &Arc<Mutex<Blockchain>> {
        &self.chain
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    fn notify(&self, event: ChainEvent) {
        // Nobody listening (tests, shutdown) is fine.
        let _ = self.events.send(event);
    }

    //
    // Queries for the operator surface.
    //

    pub async fn get_blocks(&self) -> Vec<Block> {
        self.chain.lock().await.get_blocks().to_vec()
    }

    pub async fn get_block_with_hash(&self, hash: &[u8]) -> Option<Block> {
        self.chain.lock().await.get_block_with_hash(hash).cloned()
    }

    pub async fn get_transaction_with_id(&self, id: &[u8]) -> Option<Transaction> {
        self.chain.lock().await.get_transaction_with_id(id).cloned()
    }

    pub async fn get_unspent_tx_outs(&self) -> Vec<UnspentTxOut> {
        self.chain.lock().await.get_unspent_tx_outs().to_vec()
    }

    pub async fn unspent_tx_outs_for_address(&self, address: &[u8]) -> Vec<UnspentTxOut> {
        self.chain.lock().await.unspent_tx_outs_for_address(address)
    }

    /// The wallet's spendable outputs: its UTXOs minus anything a pooled
    /// transaction already consumes.
    pub async fn my_unspent_tx_outs(&self) -> Vec<UnspentTxOut> {
        self.chain
            .lock()
            .await
            .my_unspent_tx_outs(self.wallet.get_public_key())
    }

    pub async fn get_balance(&self) -> Amount {
        let chain = self.chain.lock().await;
        self.wallet.get_balance(chain.get_unspent_tx_outs())
    }

    pub async fn get_pool_transactions(&self) -> Vec<Transaction> {
        self.chain
            .lock()
            .await
            .get_tx_pool()
            .get_transactions()
            .to_vec()
    }

    //
    // Mutations.
    //

    /// Mines a block of `data` on top of the current tip and appends it.
    ///
    /// The template is snapshotted under the lock, the nonce search runs on
    /// a blocking thread with the lock released, and the finished block goes
    /// through ordinary validation. `None` means the block was not accepted
    /// (for instance because the tip moved while mining).
    pub async fn mine_raw_block(&self, data: Vec<Transaction>) -> Option<Block> {
        let template = self.chain.lock().await.next_block_template(data);
        info!(
            "mining block {} at difficulty {}",
            template.index, template.difficulty
        );
        let block = tokio::task::spawn_blocking(move || template.mine())
            .await
            .ok()?;

        let added = self.chain.lock().await.add_block(block.clone());
        if !added {
            return None;
        }
        self.notify(ChainEvent::BroadcastLatest);
        Some(block)
    }

    /// Mines the next block: the coinbase paying this wallet, plus every
    /// pooled transaction.
    pub async fn mine_block(&self) -> Option<Block> {
        let data = {
            let chain = self.chain.lock().await;
            let coinbase = Transaction::coinbase(
                self.wallet.get_public_key().to_vec(),
                chain.get_latest().get_index() + 1,
            );
            let mut data = vec![coinbase];
            data.extend_from_slice(chain.get_tx_pool().get_transactions());
            data
        };
        self.mine_raw_block(data).await
    }

    /// Mines a block carrying the coinbase and a single payment of `amount`
    /// to `receiver_address`, built from the full UTXO set.
    pub async fn mine_transaction(
        &self,
        receiver_address: Vec<u8>,
        amount: Amount,
    ) -> Result<Option<Block>> {
        if !TxOut::is_valid_address(&receiver_address) {
            return Err(NodeError::bad_request("invalid address"));
        }
        if amount.is_negative() {
            return Err(NodeError::bad_request("invalid amount"));
        }
        let data = {
            let chain = self.chain.lock().await;
            let coinbase = Transaction::coinbase(
                self.wallet.get_public_key().to_vec(),
                chain.get_latest().get_index() + 1,
            );
            let tx = self.wallet.create_transaction(
                receiver_address,
                amount,
                chain.get_unspent_tx_outs(),
            )?;
            vec![coinbase, tx]
        };
        Ok(self.mine_raw_block(data).await)
    }

    /// Builds a payment out of the pool-filtered UTXO view, admits it to the
    /// pool and announces the pool to peers.
    pub async fn send_transaction(
        &self,
        receiver_address: Vec<u8>,
        amount: Amount,
    ) -> Result<Transaction> {
        if !TxOut::is_valid_address(&receiver_address) {
            return Err(NodeError::bad_request("invalid address"));
        }
        if amount.is_negative() {
            return Err(NodeError::bad_request("invalid amount"));
        }
        let tx = {
            let mut chain = self.chain.lock().await;
            let spendable = chain
                .get_tx_pool()
                .filtered_unspent_tx_outs(chain.get_unspent_tx_outs());
            let tx = self
                .wallet
                .create_transaction(receiver_address, amount, &spendable)?;
            if !chain.handle_received_transaction(tx.clone()) {
                return Err(NodeError::bad_request("transaction rejected by pool"));
            }
            tx
        };
        self.notify(ChainEvent::BroadcastPool);
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node() -> Node {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let wallet =
            Wallet::load_or_create(&dir.path().join("pk.pem")).expect("Failed to create wallet");
        let (events, _rx) = mpsc::unbounded_channel();
        Node::new(wallet, events)
    }

    #[tokio::test]
    async fn test_mine_block_pays_coinbase_to_wallet() {
        let node = test_node();
        let block = node.mine_block().await.expect("mining failed");

        assert_eq!(block.get_index(), 1);
        assert_eq!(block.get_data().len(), 1);
        assert_eq!(node.get_balance().await, Amount::from_u64(50));
    }

    #[tokio::test]
    async fn test_mined_transaction_moves_funds() {
        let node = test_node();
        node.mine_block().await.expect("mining failed");

        let receiver = vec![0x04; 65];
        let block = node
            .mine_transaction(receiver.clone(), Amount::from_u64(20))
            .await
            .expect("mine_transaction failed")
            .expect("block rejected");

        assert_eq!(block.get_data().len(), 2);
        // 50 mined before, plus 50 coinbase, minus 20 sent.
        assert_eq!(node.get_balance().await, Amount::from_u64(80));

        let theirs = node.unspent_tx_outs_for_address(&receiver).await;
        assert_eq!(theirs.len(), 1);
        assert_eq!(theirs[0].get_amount(), &Amount::from_u64(20));
    }

    #[tokio::test]
    async fn test_send_transaction_enters_pool() {
        let node = test_node();
        node.mine_block().await.expect("mining failed");

        let tx = node
            .send_transaction(vec![0x04; 65], Amount::from_u64(20))
            .await
            .expect("send failed");

        let pool = node.get_pool_transactions().await;
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].get_id(), tx.get_id());

        // The wallet's spendable view excludes the pending spend.
        assert!(node.my_unspent_tx_outs().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_spend_of_same_utxo_is_rejected() {
        let node = test_node();
        node.mine_block().await.expect("mining failed");

        node.send_transaction(vec![0x04; 65], Amount::from_u64(20))
            .await
            .expect("first send failed");
        let second = node
            .send_transaction(vec![0x04; 65], Amount::from_u64(5))
            .await;

        assert!(second.is_err());
        assert_eq!(node.get_pool_transactions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_pool_drains_into_mined_block() {
        let node = test_node();
        node.mine_block().await.expect("mining failed");
        node.send_transaction(vec![0x04; 65], Amount::from_u64(20))
            .await
            .expect("send failed");

        let block = node.mine_block().await.expect("mining failed");
        assert_eq!(block.get_data().len(), 2);
        assert!(node.get_pool_transactions().await.is_empty());
    }
}
