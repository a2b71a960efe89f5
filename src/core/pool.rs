//! The transaction memory pool.
//!
//! Holds validated transactions waiting for inclusion in a block. No two
//! pooled transactions may consume the same output, and every pooled input
//! must reference a currently unspent output.

use serde::Serialize;
use tracing::{debug, info};

use crate::core::transaction::{Transaction, TxIn, UnspentTxOut};

#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct TransactionPool {
    transactions: Vec<Transaction>,
}

impl TransactionPool {
    pub fn new() -> TransactionPool {
        TransactionPool {
            transactions: vec![],
        }
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Every input currently committed by a pooled transaction.
    fn ins(&self) -> impl Iterator<Item = &TxIn> {
        self.transactions.iter().flat_map(|tx| tx.get_tx_ins())
    }

    /// True when none of the transaction's inputs is already consumed by a
    /// pooled transaction.
    fn does_not_conflict(&self, transaction: &Transaction) -> bool {
        for tx_in in transaction.get_tx_ins() {
            if self.ins().any(|pooled| pooled.same_reference(tx_in)) {
                debug!("tx_in already found in the tx_pool");
                return false;
            }
        }
        true
    }

    /// Adds a transaction after validating it against the UTXO set and the
    /// pool's no-conflict invariant. Returns whether it was accepted.
    pub fn add(&mut self, transaction: Transaction, unspent_tx_outs: &[UnspentTxOut]) -> bool {
        if !transaction.validate(unspent_tx_outs) || !self.does_not_conflict(&transaction) {
            return false;
        }
        info!(
            "adding to tx_pool: {}",
            data_encoding::HEXLOWER.encode(transaction.get_id())
        );
        self.transactions.push(transaction);
        true
    }

    /// Drops every pooled transaction with an input that is no longer
    /// unspent. Called whenever the chain state changes.
    pub fn update(&mut self, unspent_tx_outs: &[UnspentTxOut]) {
        let before = self.transactions.len();
        self.transactions.retain(|tx| {
            tx.get_tx_ins()
                .iter()
                .all(|tx_in| unspent_tx_outs.iter().any(|u| u.matches_tx_in(tx_in)))
        });
        if self.transactions.len() < before {
            info!(
                "removed {} transactions from tx_pool",
                before - self.transactions.len()
            );
        }
    }

    /// The UTXO set minus every output a pooled transaction already spends.
    /// The wallet selects coins from this view so it does not double-spend
    /// against its own pending transactions.
    pub fn filtered_unspent_tx_outs(&self, unspent_tx_outs: &[UnspentTxOut]) -> Vec<UnspentTxOut> {
        unspent_tx_outs
            .iter()
            .filter(|u| !self.ins().any(|tx_in| u.matches_tx_in(tx_in)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::amount::Amount;
    use crate::core::transaction::TxOut;
    use crate::crypto;

    fn funded_wallet() -> (Vec<u8>, Vec<u8>, Vec<UnspentTxOut>) {
        let pkcs8 = crypto::new_key_pair().expect("Failed to generate key pair");
        let address = crypto::public_key_from_pkcs8(&pkcs8).expect("Failed to derive public key");
        let unspent = vec![
            UnspentTxOut::new(vec![0xaa; 32], 0, address.clone(), Amount::from_u64(50)),
            UnspentTxOut::new(vec![0xbb; 32], 1, address.clone(), Amount::from_u64(30)),
        ];
        (pkcs8, address, unspent)
    }

    fn spend(
        pkcs8: &[u8],
        address: &[u8],
        tx_out_id: Vec<u8>,
        tx_out_index: u64,
        amount: u64,
        unspent: &[UnspentTxOut],
    ) -> Transaction {
        let mut tx = Transaction::new(
            vec![TxIn::new(tx_out_id, tx_out_index)],
            vec![TxOut::new(address.to_vec(), Amount::from_u64(amount))],
        );
        let signature = tx.sign_input(0, pkcs8, unspent).expect("Failed to sign");
        tx.set_input_signature(0, signature);
        tx
    }

    #[test]
    fn test_add_accepts_valid_transaction() {
        let (pkcs8, address, unspent) = funded_wallet();
        let tx = spend(&pkcs8, &address, vec![0xaa; 32], 0, 50, &unspent);

        let mut pool = TransactionPool::new();
        assert!(pool.add(tx, &unspent));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_add_rejects_conflicting_input() {
        let (pkcs8, address, unspent) = funded_wallet();
        let first = spend(&pkcs8, &address, vec![0xaa; 32], 0, 50, &unspent);
        let second = spend(&pkcs8, &address, vec![0xaa; 32], 0, 50, &unspent);

        let mut pool = TransactionPool::new();
        assert!(pool.add(first, &unspent));
        assert!(!pool.add(second, &unspent));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_add_rejects_invalid_transaction() {
        let (_, address, unspent) = funded_wallet();
        // Unsigned spend of a known output.
        let tx = Transaction::new(
            vec![TxIn::new(vec![0xaa; 32], 0)],
            vec![TxOut::new(address, Amount::from_u64(50))],
        );

        let mut pool = TransactionPool::new();
        assert!(!pool.add(tx, &unspent));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_update_drops_spent_transactions() {
        let (pkcs8, address, unspent) = funded_wallet();
        let tx = spend(&pkcs8, &address, vec![0xaa; 32], 0, 50, &unspent);

        let mut pool = TransactionPool::new();
        assert!(pool.add(tx, &unspent));

        // The referenced output disappears from the UTXO set.
        pool.update(&unspent[1..]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_filtered_unspent_tx_outs_hides_pending_spends() {
        let (pkcs8, address, unspent) = funded_wallet();
        let tx = spend(&pkcs8, &address, vec![0xaa; 32], 0, 50, &unspent);

        let mut pool = TransactionPool::new();
        assert!(pool.add(tx, &unspent));

        let filtered = pool.filtered_unspent_tx_outs(&unspent);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].get_tx_out_id(), &[0xbb; 32]);
    }
}
