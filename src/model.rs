//! Data model: `Block` and `Transaction`, as specified in spec.md §3.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::Error;
use crate::hexutil;
use crate::stream::StreamValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Unfinalized,
    Finalized,
}

impl BlockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStatus::Unfinalized => "unfinalized",
            BlockStatus::Finalized => "finalized",
        }
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BlockStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unfinalized" => Ok(BlockStatus::Unfinalized),
            "finalized" => Ok(BlockStatus::Finalized),
            other => Err(Error::MalformedMessage(format!(
                "unknown block status: {other}"
            ))),
        }
    }
}

/// A unit of chain state at a given height, identified by `(number, hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: u64,
    pub status: BlockStatus,
    pub is_uncle: bool,
}

/// The `blocks` stream message payload (spec §6): just enough to know
/// which height to (re-)ingest and how to tag it. `BlockProcessor` fetches
/// the hash/parent/timestamp/transactions itself; the validator's uncle
/// republish uses this same minimal shape rather than a full `Block`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockWorkItem {
    pub number: u64,
    pub status: BlockStatus,
}

impl BlockWorkItem {
    pub fn to_stream_value(&self) -> StreamValue {
        let mut v = StreamValue::new();
        v.insert("number".into(), hexutil::encode_u64(self.number));
        v.insert("status".into(), self.status.to_string());
        v
    }

    pub fn from_stream_value(v: &StreamValue) -> Result<Self, Error> {
        let get = |key: &str| -> Result<String, Error> {
            v.get(key)
                .cloned()
                .ok_or_else(|| Error::MalformedMessage(format!("missing field {key}")))
        };
        Ok(BlockWorkItem {
            number: hexutil::decode_u64(&get("number")?)?,
            status: get("status")?.parse()?,
        })
    }
}

/// Minimal candidate row as read back by the validator: just enough to
/// compare against the canonical header at the same height.
#[derive(Debug, Clone)]
pub struct BlockCandidate {
    pub number: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionLog {
    pub index: u32,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub index: u64,
    pub hash: String,
    pub from: String,
    /// Empty for contract-creation transactions.
    pub to: Option<String>,
    pub nonce: u64,
    pub data: String,
    pub value: String,
    pub logs: Vec<TransactionLog>,
    pub block_hash: String,
    pub block_number: u64,
}

impl Transaction {
    /// Encodes the transaction as a stream message payload, as emitted by
    /// the block processor onto the `transactions` stream (spec §6).
    pub fn to_stream_value(&self) -> StreamValue {
        let mut v = StreamValue::new();
        v.insert("index".into(), self.index.to_string());
        v.insert("tx_hash".into(), self.hash.clone());
        v.insert("from".into(), self.from.clone());
        v.insert("to".into(), self.to.clone().unwrap_or_default());
        v.insert("nonce".into(), hexutil::encode_u64(self.nonce));
        v.insert("data".into(), self.data.clone());
        v.insert("value".into(), self.value.clone());
        v.insert("block_hash".into(), self.block_hash.clone());
        v.insert(
            "block_number".into(),
            hexutil::encode_u64(self.block_number),
        );
        v
    }

    /// Parses a `transactions` stream payload back into a `Transaction`
    /// with empty `logs` (populated later by the transaction processor
    /// from the receipt).
    pub fn from_stream_value(v: &StreamValue) -> Result<Self, Error> {
        let get = |key: &str| -> Result<String, Error> {
            v.get(key)
                .cloned()
                .ok_or_else(|| Error::MalformedMessage(format!("missing field {key}")))
        };
        let to = get("to")?;
        Ok(Transaction {
            index: get("index")?
                .parse()
                .map_err(|e| Error::MalformedMessage(format!("invalid index: {e}")))?,
            hash: get("tx_hash")?,
            from: get("from")?,
            to: if to.is_empty() { None } else { Some(to) },
            nonce: hexutil::decode_u64(&get("nonce")?)?,
            data: get("data")?,
            value: get("value")?,
            logs: Vec::new(),
            block_hash: get("block_hash")?,
            block_number: hexutil::decode_u64(&get("block_number")?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_stream_round_trip_preserves_identity_fields() {
        let tx = Transaction {
            index: 3,
            hash: "0xabc".into(),
            from: "0xfrom".into(),
            to: Some("0xto".into()),
            nonce: 42,
            data: "0xdeadbeef".into(),
            value: "1000000000000000000".into(),
            logs: Vec::new(),
            block_hash: "0xblockhash".into(),
            block_number: 100,
        };
        let value = tx.to_stream_value();
        let decoded = Transaction::from_stream_value(&value).unwrap();
        assert_eq!(decoded.hash, tx.hash);
        assert_eq!(decoded.from, tx.from);
        assert_eq!(decoded.to, tx.to);
        assert_eq!(decoded.nonce, tx.nonce);
        assert_eq!(decoded.block_number, tx.block_number);
        assert_eq!(decoded.value, tx.value);
    }

    #[test]
    fn contract_creation_has_no_to_address() {
        let tx = Transaction {
            index: 0,
            hash: "0xabc".into(),
            from: "0xfrom".into(),
            to: None,
            nonce: 0,
            data: "0x".into(),
            value: "0".into(),
            logs: Vec::new(),
            block_hash: "0xblockhash".into(),
            block_number: 1,
        };
        let value = tx.to_stream_value();
        let decoded = Transaction::from_stream_value(&value).unwrap();
        assert_eq!(decoded.to, None);
    }

    #[test]
    fn block_work_item_round_trip_preserves_number_and_status() {
        let item = BlockWorkItem {
            number: 100,
            status: BlockStatus::Unfinalized,
        };
        let value = item.to_stream_value();
        let decoded = BlockWorkItem::from_stream_value(&value).unwrap();
        assert_eq!(decoded.number, item.number);
        assert_eq!(decoded.status, item.status);
    }

    #[test]
    fn block_work_item_decodes_literal_spec_message() {
        let mut value = StreamValue::new();
        value.insert("number".into(), "0x64".into());
        value.insert("status".into(), "finalized".into());
        let decoded = BlockWorkItem::from_stream_value(&value).unwrap();
        assert_eq!(decoded.number, 100);
        assert_eq!(decoded.status, BlockStatus::Finalized);
    }

    #[test]
    fn logs_json_round_trip_preserves_index_and_data() {
        let logs = vec![
            TransactionLog {
                index: 0,
                data: "0x01".into(),
            },
            TransactionLog {
                index: 1,
                data: "0x02".into(),
            },
        ];
        let encoded = serde_json::to_string(&logs).unwrap();
        let decoded: Vec<TransactionLog> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, logs);
    }
}
