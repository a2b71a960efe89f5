//! The wallet: private-key custody, balance queries and transaction
//! construction.
//!
//! The signing key lives in a PEM file on disk (PKCS#8 inside). A missing
//! file is generated on first run; an unreadable or uncreatable one is fatal
//! at bootstrap.

use std::fs;
use std::path::Path;

use data_encoding::HEXLOWER;
use tracing::info;

use crate::core::amount::Amount;
use crate::core::transaction::{Transaction, TxIn, TxOut, UnspentTxOut};
use crate::crypto;
use crate::error::{NodeError, Result};

const PEM_TAG: &str = "PRIVATE KEY";

pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    /// Loads the signing key from `path`, generating and saving a fresh one
    /// when no file exists yet.
    pub fn load_or_create(path: &Path) -> Result<Wallet> {
        let pkcs8 = match fs::read(path) {
            Ok(bytes) => {
                let parsed = pem::parse(&bytes)
                    .map_err(|e| NodeError::KeyFile(format!("{}: {}", path.display(), e)))?;
                if parsed.tag() != PEM_TAG {
                    return Err(NodeError::KeyFile(format!(
                        "{}: unexpected PEM tag {}",
                        path.display(),
                        parsed.tag()
                    )));
                }
                parsed.contents().to_vec()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("private key file not found, generating a new key");
                let pkcs8 = crypto::new_key_pair()?;
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent).map_err(|e| {
                            NodeError::KeyFile(format!("{}: {}", parent.display(), e))
                        })?;
                    }
                }
                let encoded = pem::encode(&pem::Pem::new(PEM_TAG, pkcs8.clone()));
                fs::write(path, encoded)
                    .map_err(|e| NodeError::KeyFile(format!("{}: {}", path.display(), e)))?;
                pkcs8
            }
            Err(e) => {
                return Err(NodeError::KeyFile(format!("{}: {}", path.display(), e)));
            }
        };
        let public_key = crypto::public_key_from_pkcs8(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    /// The wallet's address: its raw public key bytes.
    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_address_hex(&self) -> String {
        HEXLOWER.encode(&self.public_key)
    }

    /// Sum of every unspent output paying this wallet.
    pub fn get_balance(&self, unspent_tx_outs: &[UnspentTxOut]) -> Amount {
        Wallet::balance_of(&self.public_key, unspent_tx_outs)
    }

    pub fn balance_of(address: &[u8], unspent_tx_outs: &[UnspentTxOut]) -> Amount {
        unspent_tx_outs
            .iter()
            .filter(|u| u.get_address() == address)
            .map(|u| u.get_amount().clone())
            .sum()
    }

    /// Greedily selects this wallet's unspent outputs, in the order they
    /// appear in the set, until they cover `amount`. Returns the selection
    /// and the change left over.
    fn find_tx_outs_for_amount<'a>(
        amount: &Amount,
        my_unspent_tx_outs: &'a [UnspentTxOut],
    ) -> Result<(Vec<&'a UnspentTxOut>, Amount)> {
        let mut current = Amount::zero();
        let mut included = vec![];
        for unspent_tx_out in my_unspent_tx_outs {
            included.push(unspent_tx_out);
            current = current + unspent_tx_out.get_amount().clone();
            if current > *amount {
                return Ok((included, current - amount.clone()));
            }
        }
        Err(NodeError::bad_request("not enough coins to send transaction"))
    }

    fn create_tx_outs(
        &self,
        receiver_address: Vec<u8>,
        amount: Amount,
        left_over_amount: Amount,
    ) -> Vec<TxOut> {
        let mut tx_outs = vec![TxOut::new(receiver_address, amount)];
        if !left_over_amount.is_zero() {
            tx_outs.push(TxOut::new(self.public_key.clone(), left_over_amount));
        }
        tx_outs
    }

    /// Builds and signs a payment of `amount` to `receiver_address` out of
    /// the supplied UTXO view. Fails with `BadRequest` when the wallet
    /// cannot cover the amount.
    pub fn create_transaction(
        &self,
        receiver_address: Vec<u8>,
        amount: Amount,
        unspent_tx_outs: &[UnspentTxOut],
    ) -> Result<Transaction> {
        let my_unspent_tx_outs: Vec<UnspentTxOut> = unspent_tx_outs
            .iter()
            .filter(|u| u.get_address() == self.public_key.as_slice())
            .cloned()
            .collect();
        let (included, left_over_amount) =
            Wallet::find_tx_outs_for_amount(&amount, &my_unspent_tx_outs)?;

        let unsigned_tx_ins = included
            .iter()
            .map(|u| TxIn::new(u.get_tx_out_id().to_vec(), u.get_tx_out_index()))
            .collect();
        let tx_outs = self.create_tx_outs(receiver_address, amount, left_over_amount);

        let mut tx = Transaction::new(unsigned_tx_ins, tx_outs);
        for index in 0..tx.get_tx_ins().len() {
            let signature = tx.sign_input(index, &self.pkcs8, unspent_tx_outs)?;
            tx.set_input_signature(index, signature);
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_wallet(dir: &tempfile::TempDir, name: &str) -> Wallet {
        Wallet::load_or_create(&dir.path().join(name)).expect("Failed to create wallet")
    }

    fn funded(wallet: &Wallet, amounts: &[u64]) -> Vec<UnspentTxOut> {
        amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| {
                UnspentTxOut::new(
                    vec![i as u8; 32],
                    i as u64,
                    wallet.get_public_key().to_vec(),
                    Amount::from_u64(*amount),
                )
            })
            .collect()
    }

    #[test]
    fn test_key_is_generated_then_reloaded() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("keys").join("pk.pem");

        let wallet = Wallet::load_or_create(&path).expect("Failed to create wallet");
        assert!(path.exists());

        let reloaded = Wallet::load_or_create(&path).expect("Failed to reload wallet");
        assert_eq!(wallet.get_public_key(), reloaded.get_public_key());
    }

    #[test]
    fn test_garbage_key_file_is_fatal() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("pk.pem");
        fs::write(&path, "not a pem file").expect("Failed to write file");

        assert!(matches!(
            Wallet::load_or_create(&path),
            Err(NodeError::KeyFile(_))
        ));
    }

    #[test]
    fn test_balance_sums_only_own_outputs() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let wallet = fresh_wallet(&dir, "pk.pem");
        let mut unspent = funded(&wallet, &[50, 30]);
        unspent.push(UnspentTxOut::new(
            vec![0xcc; 32],
            0,
            vec![0x04; 65],
            Amount::from_u64(10),
        ));

        assert_eq!(wallet.get_balance(&unspent), Amount::from_u64(80));
    }

    #[test]
    fn test_create_transaction_with_change() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let wallet = fresh_wallet(&dir, "pk.pem");
        let receiver = fresh_wallet(&dir, "receiver.pem");
        let unspent = funded(&wallet, &[50]);

        let tx = wallet
            .create_transaction(
                receiver.get_public_key().to_vec(),
                Amount::from_u64(20),
                &unspent,
            )
            .expect("Failed to create transaction");

        assert_eq!(tx.get_tx_ins().len(), 1);
        assert_eq!(tx.get_tx_outs().len(), 2);
        assert_eq!(tx.get_tx_outs()[0].get_amount(), &Amount::from_u64(20));
        assert_eq!(
            tx.get_tx_outs()[0].get_address(),
            receiver.get_public_key()
        );
        assert_eq!(tx.get_tx_outs()[1].get_amount(), &Amount::from_u64(30));
        assert_eq!(tx.get_tx_outs()[1].get_address(), wallet.get_public_key());
        assert!(tx.validate(&unspent));
    }

    #[test]
    fn test_create_transaction_insufficient_funds() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let wallet = fresh_wallet(&dir, "pk.pem");
        let unspent = funded(&wallet, &[10, 5]);

        assert!(matches!(
            wallet.create_transaction(vec![0x04; 65], Amount::from_u64(20), &unspent),
            Err(NodeError::BadRequest { .. })
        ));
    }
}
