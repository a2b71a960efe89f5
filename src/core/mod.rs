// Ledger domain: amounts, transactions, the mempool, blocks and the chain.
pub mod amount;
pub mod block;
pub mod blockchain;
pub mod pool;
pub mod transaction;

pub use amount::Amount;
pub use block::{Block, GENESIS};
pub use blockchain::{BlockTemplate, Blockchain};
pub use pool::TransactionPool;
pub use transaction::{COINBASE_AMOUNT, Transaction, TxIn, TxOut, UnspentTxOut};

/// Serde adapters for byte fields carried as lowercase hex on the wire.
pub(crate) mod hex_bytes {
    use data_encoding::HEXLOWER;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&HEXLOWER.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        HEXLOWER
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// As `hex_bytes`, with `null` standing for an absent value.
pub(crate) mod hex_bytes_opt {
    use data_encoding::HEXLOWER;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&HEXLOWER.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        text.map(|text| {
            HEXLOWER
                .decode(text.as_bytes())
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}
