//! The UTXO transaction model.
//!
//! A transaction consumes unspent outputs of earlier transactions and creates
//! new ones. Its id commits to the inputs' references and the outputs'
//! addresses and amounts, but not to the signatures; each input is signed
//! over the id with the key owning the referenced output.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::amount::Amount;
use crate::core::{hex_bytes, hex_bytes_opt};
use crate::crypto::{self, ADDRESS_LENGTH, HASH_LENGTH};
use crate::error::{NodeError, Result};

/// Reward minted by the coinbase transaction of every block.
pub static COINBASE_AMOUNT: Lazy<Amount> = Lazy::new(|| Amount::from_u64(50));

/// Minimal-width big-endian bytes of an integer; zero encodes as one
/// zero byte. This is the index encoding committed into transaction ids.
fn min_be_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    bytes[start..].to_vec()
}

/// Transaction output: an amount payable to the holder of `address`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxOut {
    #[serde(with = "hex_bytes")]
    address: Vec<u8>,
    amount: Amount,
}

impl TxOut {
    pub fn new(address: Vec<u8>, amount: Amount) -> TxOut {
        TxOut { address, amount }
    }

    pub fn get_address(&self) -> &[u8] {
        self.address.as_slice()
    }

    pub fn get_amount(&self) -> &Amount {
        &self.amount
    }

    pub fn is_valid_address(address: &[u8]) -> bool {
        if address.len() != ADDRESS_LENGTH {
            warn!("invalid public key length: {}", address.len());
            return false;
        }
        true
    }

    pub fn has_valid_structure(&self) -> bool {
        TxOut::is_valid_address(&self.address) && !self.amount.is_negative()
    }
}

/// Transaction input: a reference to an unspent output, plus the signature
/// authorizing the spend. Unsigned while the transaction is being built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxIn {
    #[serde(rename = "txOutId", with = "hex_bytes")]
    tx_out_id: Vec<u8>,
    #[serde(rename = "txOutIndex")]
    tx_out_index: u64,
    #[serde(with = "hex_bytes_opt")]
    signature: Option<Vec<u8>>,
}

impl TxIn {
    pub fn new(tx_out_id: Vec<u8>, tx_out_index: u64) -> TxIn {
        TxIn {
            tx_out_id,
            tx_out_index,
            signature: None,
        }
    }

    /// The input of a coinbase transaction references nothing; it carries the
    /// block height in `tx_out_index` so every coinbase hashes uniquely.
    pub fn coinbase(block_index: u64) -> TxIn {
        TxIn {
            tx_out_id: vec![],
            tx_out_index: block_index,
            signature: Some(vec![]),
        }
    }

    pub fn get_tx_out_id(&self) -> &[u8] {
        self.tx_out_id.as_slice()
    }

    pub fn get_tx_out_index(&self) -> u64 {
        self.tx_out_index
    }

    pub fn get_signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    /// Inputs are identified by the output they consume, regardless of
    /// signature bytes.
    pub fn same_reference(&self, other: &TxIn) -> bool {
        self.tx_out_id == other.tx_out_id && self.tx_out_index == other.tx_out_index
    }

    pub fn has_valid_structure(&self) -> bool {
        self.signature.is_some()
    }

    /// Verifies this input against the UTXO set: the referenced output must
    /// exist and the signature must check out under its address, over the
    /// spending transaction's id.
    pub fn validate(&self, tx_id: &[u8], unspent_tx_outs: &[UnspentTxOut]) -> bool {
        let referenced =
            match UnspentTxOut::find(&self.tx_out_id, self.tx_out_index, unspent_tx_outs) {
                Some(referenced) => referenced,
                None => {
                    warn!(
                        "referenced tx_out not found: {}:{}",
                        data_encoding::HEXLOWER.encode(&self.tx_out_id),
                        self.tx_out_index
                    );
                    return false;
                }
            };
        let signature = match &self.signature {
            Some(signature) if !signature.is_empty() => signature,
            _ => return false,
        };
        let valid = crypto::ecdsa_verify(&referenced.address, signature, tx_id);
        if !valid {
            warn!("bad signature for tx_in {}", self.tx_out_index);
        }
        valid
    }

    pub fn get_amount(&self, unspent_tx_outs: &[UnspentTxOut]) -> Option<Amount> {
        UnspentTxOut::find(&self.tx_out_id, self.tx_out_index, unspent_tx_outs)
            .map(|u| u.amount.clone())
    }

    /// True when two inputs in the batch consume the same output.
    pub fn has_duplicates<'a>(tx_ins: impl Iterator<Item = &'a TxIn>) -> bool {
        let mut seen = std::collections::HashSet::new();
        for tx_in in tx_ins {
            if !seen.insert((tx_in.tx_out_id.clone(), tx_in.tx_out_index)) {
                warn!("duplicate tx_in: index {}", tx_in.tx_out_index);
                return true;
            }
        }
        false
    }
}

/// An output of a confirmed transaction not yet consumed by any input.
/// Identity is the `(tx_out_id, tx_out_index)` pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnspentTxOut {
    #[serde(rename = "txOutId", with = "hex_bytes")]
    tx_out_id: Vec<u8>,
    #[serde(rename = "txOutIndex")]
    tx_out_index: u64,
    #[serde(with = "hex_bytes")]
    address: Vec<u8>,
    amount: Amount,
}

impl UnspentTxOut {
    pub fn new(tx_out_id: Vec<u8>, tx_out_index: u64, address: Vec<u8>, amount: Amount) -> Self {
        UnspentTxOut {
            tx_out_id,
            tx_out_index,
            address,
            amount,
        }
    }

    pub fn get_tx_out_id(&self) -> &[u8] {
        self.tx_out_id.as_slice()
    }

    pub fn get_tx_out_index(&self) -> u64 {
        self.tx_out_index
    }

    pub fn get_address(&self) -> &[u8] {
        self.address.as_slice()
    }

    pub fn get_amount(&self) -> &Amount {
        &self.amount
    }

    pub fn matches_tx_in(&self, tx_in: &TxIn) -> bool {
        self.tx_out_id == tx_in.tx_out_id && self.tx_out_index == tx_in.tx_out_index
    }

    pub fn find<'a>(
        tx_out_id: &[u8],
        tx_out_index: u64,
        unspent_tx_outs: &'a [UnspentTxOut],
    ) -> Option<&'a UnspentTxOut> {
        unspent_tx_outs
            .iter()
            .find(|u| u.tx_out_id == tx_out_id && u.tx_out_index == tx_out_index)
    }

    /// Functional UTXO-set update: remove the outputs consumed by the new
    /// transactions, add the outputs they create.
    pub fn update_unspent_tx_outs(
        new_transactions: &[Transaction],
        current: &[UnspentTxOut],
    ) -> Vec<UnspentTxOut> {
        let new_unspent: Vec<UnspentTxOut> = new_transactions
            .iter()
            .flat_map(|tx| {
                tx.tx_outs.iter().enumerate().map(|(index, tx_out)| {
                    UnspentTxOut::new(
                        tx.id.clone(),
                        index as u64,
                        tx_out.address.clone(),
                        tx_out.amount.clone(),
                    )
                })
            })
            .collect();

        let consumed: Vec<&TxIn> = new_transactions.iter().flat_map(|tx| &tx.tx_ins).collect();

        let mut resulting: Vec<UnspentTxOut> = current
            .iter()
            .filter(|u| !consumed.iter().any(|tx_in| u.matches_tx_in(tx_in)))
            .cloned()
            .collect();
        resulting.extend(new_unspent);
        resulting
    }
}

/// A payment: a list of inputs, a list of outputs, and the id committing
/// to both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "txIns")]
    tx_ins: Vec<TxIn>,
    #[serde(rename = "txOuts")]
    tx_outs: Vec<TxOut>,
    #[serde(with = "hex_bytes")]
    id: Vec<u8>,
}

impl Transaction {
    pub fn new(tx_ins: Vec<TxIn>, tx_outs: Vec<TxOut>) -> Transaction {
        let id = Transaction::compute_id(&tx_ins, &tx_outs);
        Transaction {
            tx_ins,
            tx_outs,
            id,
        }
    }

    /// The coinbase transaction of a block: one reference-free input carrying
    /// the block height, one output minting the reward.
    pub fn coinbase(address: Vec<u8>, block_index: u64) -> Transaction {
        Transaction::new(
            vec![TxIn::coinbase(block_index)],
            vec![TxOut::new(address, COINBASE_AMOUNT.clone())],
        )
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_tx_ins(&self) -> &[TxIn] {
        self.tx_ins.as_slice()
    }

    pub fn get_tx_outs(&self) -> &[TxOut] {
        self.tx_outs.as_slice()
    }

    /// SHA-256 over every input's output reference followed by every output's
    /// address and amount, amounts as their reduced integer ratio in
    /// minimal big-endian bytes. Signatures are deliberately outside the
    /// commitment, matching the wire protocol this node speaks.
    fn compute_id(tx_ins: &[TxIn], tx_outs: &[TxOut]) -> Vec<u8> {
        let mut context = ring::digest::Context::new(&ring::digest::SHA256);
        for tx_in in tx_ins {
            context.update(&tx_in.tx_out_id);
            context.update(&min_be_bytes(tx_in.tx_out_index));
        }
        for tx_out in tx_outs {
            context.update(&tx_out.address);
            let (numer, denom) = tx_out.amount.as_integer_ratio();
            context.update(&numer.magnitude().to_bytes_be());
            context.update(&denom.magnitude().to_bytes_be());
        }
        context.finish().as_ref().to_vec()
    }

    pub fn has_valid_structure(&self) -> bool {
        self.id.len() == HASH_LENGTH
            && self.tx_ins.iter().all(TxIn::has_valid_structure)
            && self.tx_outs.iter().all(TxOut::has_valid_structure)
    }

    /// Validates a normal transaction against the UTXO set: correct id,
    /// every input references an existing output with a valid signature,
    /// and input and output sums balance.
    pub fn validate(&self, unspent_tx_outs: &[UnspentTxOut]) -> bool {
        if self.id != Transaction::compute_id(&self.tx_ins, &self.tx_outs) {
            warn!(
                "invalid tx id: {}",
                data_encoding::HEXLOWER.encode(&self.id)
            );
            return false;
        }
        if !self
            .tx_ins
            .iter()
            .all(|tx_in| tx_in.validate(&self.id, unspent_tx_outs))
        {
            warn!("some of tx_ins are invalid");
            return false;
        }

        let total_in: Option<Amount> = self
            .tx_ins
            .iter()
            .map(|tx_in| tx_in.get_amount(unspent_tx_outs))
            .sum::<Option<Amount>>();
        let total_out: Amount = self
            .tx_outs
            .iter()
            .map(|tx_out| tx_out.amount.clone())
            .sum();
        if total_in != Some(total_out) {
            warn!("total input values do not match total output values");
            return false;
        }
        true
    }

    /// Validates the coinbase transaction of the block at `block_index`.
    pub fn validate_coinbase(&self, block_index: u64) -> bool {
        if self.id != Transaction::compute_id(&self.tx_ins, &self.tx_outs) {
            warn!("invalid coinbase tx id");
            return false;
        }
        if self.tx_ins.len() != 1 {
            warn!("one tx_in must be specified in the coinbase transaction");
            return false;
        }
        if self.tx_ins[0].tx_out_index != block_index {
            warn!("the tx_in index in coinbase tx must be the block height");
            return false;
        }
        if self.tx_outs.len() != 1 {
            warn!("invalid number of tx_outs in coinbase transaction");
            return false;
        }
        if self.tx_outs[0].amount != *COINBASE_AMOUNT {
            warn!("invalid coinbase amount in coinbase transaction");
            return false;
        }
        true
    }

    /// Validates a block's transaction batch: the first transaction is the
    /// coinbase, no output is consumed twice across the batch, and the rest
    /// validate individually.
    pub fn validate_block_transactions(
        transactions: &[Transaction],
        unspent_tx_outs: &[UnspentTxOut],
        block_index: u64,
    ) -> bool {
        let coinbase = match transactions.first() {
            Some(coinbase) => coinbase,
            None => return true,
        };
        if !coinbase.validate_coinbase(block_index) {
            warn!("invalid coinbase tx");
            return false;
        }
        if TxIn::has_duplicates(transactions.iter().flat_map(|tx| tx.tx_ins.iter())) {
            return false;
        }
        transactions[1..]
            .iter()
            .all(|tx| tx.validate(unspent_tx_outs))
    }

    /// Validates the batch and, when everything holds, returns the updated
    /// UTXO set. `None` means the block must be rejected.
    pub fn process_transactions(
        transactions: &[Transaction],
        unspent_tx_outs: &[UnspentTxOut],
        block_index: u64,
    ) -> Option<Vec<UnspentTxOut>> {
        if !transactions.iter().all(Transaction::has_valid_structure) {
            warn!("some of the transactions have invalid structure");
            return None;
        }
        if !Transaction::validate_block_transactions(transactions, unspent_tx_outs, block_index) {
            warn!("invalid block transactions");
            return None;
        }
        Some(UnspentTxOut::update_unspent_tx_outs(
            transactions,
            unspent_tx_outs,
        ))
    }

    /// Produces the signature for input `index` over this transaction's id.
    ///
    /// Fails with `BadRequest` when the referenced output is unknown and with
    /// `Unauthorized` when the signing key does not own it.
    pub fn sign_input(
        &self,
        index: usize,
        pkcs8: &[u8],
        unspent_tx_outs: &[UnspentTxOut],
    ) -> Result<Vec<u8>> {
        let tx_in = &self.tx_ins[index];
        let referenced = UnspentTxOut::find(&tx_in.tx_out_id, tx_in.tx_out_index, unspent_tx_outs)
            .ok_or_else(|| NodeError::bad_request("could not find referenced txOut"))?;
        let public_key = crypto::public_key_from_pkcs8(pkcs8)?;
        if public_key != referenced.address {
            return Err(NodeError::unauthorized("invalid private key"));
        }
        crypto::ecdsa_sign(pkcs8, &self.id)
    }

    pub(crate) fn set_input_signature(&mut self, index: usize, signature: Vec<u8>) {
        self.tx_ins[index].signature = Some(signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_address() -> (Vec<u8>, Vec<u8>) {
        let pkcs8 = crypto::new_key_pair().expect("Failed to generate key pair");
        let address = crypto::public_key_from_pkcs8(&pkcs8).expect("Failed to derive public key");
        (pkcs8, address)
    }

    /// A signed transaction spending one 50-coin UTXO owned by `pkcs8`.
    fn signed_transfer(
        pkcs8: &[u8],
        from: Vec<u8>,
        to: Vec<u8>,
    ) -> (Transaction, Vec<UnspentTxOut>) {
        let unspent = vec![UnspentTxOut::new(
            vec![0xaa; 32],
            0,
            from.clone(),
            Amount::from_u64(50),
        )];
        let mut tx = Transaction::new(
            vec![TxIn::new(vec![0xaa; 32], 0)],
            vec![
                TxOut::new(to, Amount::from_u64(20)),
                TxOut::new(from, Amount::from_u64(30)),
            ],
        );
        let signature = tx.sign_input(0, pkcs8, &unspent).expect("Failed to sign");
        tx.set_input_signature(0, signature);
        (tx, unspent)
    }

    #[test]
    fn test_coinbase_is_valid_at_its_height() {
        let (_, address) = test_address();
        let tx = Transaction::coinbase(address, 7);

        assert!(tx.has_valid_structure());
        assert!(tx.validate_coinbase(7));
        assert!(!tx.validate_coinbase(8));
        assert_eq!(tx.get_id().len(), HASH_LENGTH);
    }

    #[test]
    fn test_coinbase_amount_is_enforced() {
        let (_, address) = test_address();
        let tx = Transaction::new(
            vec![TxIn::coinbase(3)],
            vec![TxOut::new(address, Amount::from_u64(51))],
        );
        assert!(!tx.validate_coinbase(3));
    }

    #[test]
    fn test_signed_transaction_validates() {
        let (pkcs8, from) = test_address();
        let (_, to) = test_address();
        let (tx, unspent) = signed_transfer(&pkcs8, from, to);

        assert!(tx.validate(&unspent));
    }

    #[test]
    fn test_wrong_key_cannot_sign() {
        let (_, from) = test_address();
        let (other_pkcs8, _) = test_address();
        let unspent = vec![UnspentTxOut::new(
            vec![0xaa; 32],
            0,
            from.clone(),
            Amount::from_u64(50),
        )];
        let tx = Transaction::new(
            vec![TxIn::new(vec![0xaa; 32], 0)],
            vec![TxOut::new(from, Amount::from_u64(50))],
        );

        match tx.sign_input(0, &other_pkcs8, &unspent) {
            Err(NodeError::Unauthorized { .. }) => {}
            other => panic!("expected Unauthorized, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_input_cannot_be_signed() {
        let (pkcs8, from) = test_address();
        let tx = Transaction::new(
            vec![TxIn::new(vec![0xbb; 32], 0)],
            vec![TxOut::new(from, Amount::from_u64(50))],
        );

        assert!(matches!(
            tx.sign_input(0, &pkcs8, &[]),
            Err(NodeError::BadRequest { .. })
        ));
    }

    #[test]
    fn test_amount_mismatch_is_rejected() {
        let (pkcs8, from) = test_address();
        let unspent = vec![UnspentTxOut::new(
            vec![0xaa; 32],
            0,
            from.clone(),
            Amount::from_u64(50),
        )];
        let mut tx = Transaction::new(
            vec![TxIn::new(vec![0xaa; 32], 0)],
            vec![TxOut::new(from, Amount::from_u64(49))],
        );
        let signature = tx.sign_input(0, &pkcs8, &unspent).expect("Failed to sign");
        tx.set_input_signature(0, signature);

        assert!(!tx.validate(&unspent));
    }

    #[test]
    fn test_tampered_id_is_rejected() {
        let (pkcs8, from) = test_address();
        let (_, to) = test_address();
        let (mut tx, unspent) = signed_transfer(&pkcs8, from, to);
        tx.id[0] ^= 0x01;

        assert!(!tx.validate(&unspent));
    }

    #[test]
    fn test_duplicate_inputs_detected_across_batch() {
        let a = TxIn::new(vec![1, 2, 3], 0);
        let b = TxIn::new(vec![1, 2, 3], 1);
        let c = TxIn::new(vec![1, 2, 3], 0);

        assert!(!TxIn::has_duplicates([&a, &b].into_iter()));
        assert!(TxIn::has_duplicates([&a, &b, &c].into_iter()));
    }

    #[test]
    fn test_process_transactions_moves_value() {
        let (pkcs8, from) = test_address();
        let (_, to) = test_address();
        let (tx, unspent) = signed_transfer(&pkcs8, from.clone(), to.clone());
        let coinbase = Transaction::coinbase(from.clone(), 1);

        let updated =
            Transaction::process_transactions(&[coinbase.clone(), tx.clone()], &unspent, 1)
                .expect("batch should process");

        // The spent output is gone; the coinbase and both transfer outputs
        // are present.
        assert_eq!(updated.len(), 3);
        assert!(UnspentTxOut::find(&[0xaa; 32], 0, &updated).is_none());
        assert!(UnspentTxOut::find(coinbase.get_id(), 0, &updated).is_some());
        let to_output = UnspentTxOut::find(tx.get_id(), 0, &updated).expect("missing output");
        assert_eq!(to_output.get_address(), to.as_slice());
        assert_eq!(to_output.get_amount(), &Amount::from_u64(20));
    }

    #[test]
    fn test_process_transactions_rejects_double_spend_batch() {
        let (pkcs8, from) = test_address();
        let (_, to) = test_address();
        let (tx, unspent) = signed_transfer(&pkcs8, from.clone(), to.clone());
        let (tx2, _) = signed_transfer(&pkcs8, from.clone(), from.clone());
        let coinbase = Transaction::coinbase(from, 1);

        assert!(Transaction::process_transactions(&[coinbase, tx, tx2], &unspent, 1).is_none());
    }

    #[test]
    fn test_raw_roundtrip() {
        let (pkcs8, from) = test_address();
        let (_, to) = test_address();
        let (tx, _) = signed_transfer(&pkcs8, from, to);

        let raw = serde_json::to_string(&tx).expect("Failed to serialize");
        let parsed: Transaction = serde_json::from_str(&raw).expect("Failed to deserialize");
        assert_eq!(tx, parsed);

        // Wire field names follow the protocol, not the struct.
        assert!(raw.contains("\"txIns\""));
        assert!(raw.contains("\"txOutId\""));
        assert!(raw.contains("\"txOuts\""));
    }

    #[test]
    fn test_min_be_bytes() {
        assert_eq!(min_be_bytes(0), vec![0]);
        assert_eq!(min_be_bytes(1), vec![1]);
        assert_eq!(min_be_bytes(256), vec![1, 0]);
        assert_eq!(min_be_bytes(u64::MAX), vec![0xff; 8]);
    }
}
