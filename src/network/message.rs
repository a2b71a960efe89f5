//! The gossip wire protocol.
//!
//! One JSON object per transport frame: `{"type": <0..4>, "data": <payload>}`.
//! Tags are fixed by the protocol; unknown tags are a decode error the
//! engine logs before dropping the frame.

use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::core::block::Block;
use crate::core::transaction::Transaction;
use crate::error::{NodeError, Result};

const QUERY_LATEST: u8 = 0;
const QUERY_ALL: u8 = 1;
const RESPONSE_BLOCKCHAIN: u8 = 2;
const QUERY_TRANSACTION_POOL: u8 = 3;
const RESPONSE_TRANSACTION_POOL: u8 = 4;

/// A message of the peer-to-peer protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Ask a peer for its latest block.
    QueryLatest,
    /// Ask a peer for its full chain.
    QueryAll,
    /// A chain fragment: either just the tip or the full chain.
    ResponseBlockchain(Vec<Block>),
    /// Ask a peer for its transaction pool.
    QueryTransactionPool,
    /// The peer's pooled transactions.
    ResponseTransactionPool(Vec<Transaction>),
}

impl Message {
    fn code(&self) -> u8 {
        match self {
            Message::QueryLatest => QUERY_LATEST,
            Message::QueryAll => QUERY_ALL,
            Message::ResponseBlockchain(_) => RESPONSE_BLOCKCHAIN,
            Message::QueryTransactionPool => QUERY_TRANSACTION_POOL,
            Message::ResponseTransactionPool(_) => RESPONSE_TRANSACTION_POOL,
        }
    }

    /// Serializes into a single wire frame.
    pub fn to_frame(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| NodeError::Transport(e.to_string()))
    }

    /// Strictly decodes a wire frame; unknown tags and malformed payloads
    /// are errors.
    pub fn from_frame(frame: &str) -> Result<Message> {
        serde_json::from_str(frame).map_err(|e| NodeError::bad_request(e.to_string()))
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Message", 2)?;
        state.serialize_field("type", &self.code())?;
        match self {
            Message::QueryLatest | Message::QueryAll | Message::QueryTransactionPool => {
                state.serialize_field("data", &Value::Null)?;
            }
            Message::ResponseBlockchain(blocks) => {
                state.serialize_field("data", blocks)?;
            }
            Message::ResponseTransactionPool(transactions) => {
                state.serialize_field("data", transactions)?;
            }
        }
        state.end()
    }
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    message_type: u8,
    #[serde(default)]
    data: Value,
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawMessage::deserialize(deserializer)?;
        match raw.message_type {
            QUERY_LATEST => Ok(Message::QueryLatest),
            QUERY_ALL => Ok(Message::QueryAll),
            QUERY_TRANSACTION_POOL => Ok(Message::QueryTransactionPool),
            RESPONSE_BLOCKCHAIN => serde_json::from_value(raw.data)
                .map(Message::ResponseBlockchain)
                .map_err(D::Error::custom),
            RESPONSE_TRANSACTION_POOL => serde_json::from_value(raw.data)
                .map(Message::ResponseTransactionPool)
                .map_err(D::Error::custom),
            other => Err(D::Error::custom(format!("unknown message type: {}", other))),
        }
    }
}
