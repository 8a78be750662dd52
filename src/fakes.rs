//! In-memory test doubles for `Stream`, `Store`, `Checkpoint` and
//! `ChainClient`. Every service module's tests run against these instead
//! of a real Redis/Postgres/RPC endpoint, the same "interface + fake"
//! shape the teacher uses for its own trait-object abstractions.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::chain::{ChainBlock, ChainClient, ChainHeader};
use crate::checkpoint::Checkpoint;
use crate::errors::Error;
use crate::model::{Block, BlockCandidate, Transaction, TransactionLog};
use crate::store::Store;
use crate::stream::{StreamConsumer, StreamMessage, StreamProducer, StreamValue};

/// A single in-process stream shared between a producer handle and any
/// number of consumer handles. Delivery/ack/idle-reclaim is modeled
/// closely enough to exercise the same call sequences the Redis binding
/// does, without needing a broker.
#[derive(Default)]
struct MemoryStreamState {
    entries: Vec<(String, StreamValue)>,
    next_id: u64,
    /// Per-consumer-group read cursor (index into `entries`).
    cursors: HashMap<String, usize>,
    pending: HashMap<String, (String, StreamValue)>,
}

pub struct MemoryStream {
    state: Mutex<MemoryStreamState>,
    group: Option<String>,
}

impl MemoryStream {
    pub fn new() -> Self {
        MemoryStream {
            state: Mutex::new(MemoryStreamState::default()),
            group: None,
        }
    }

    /// A consumer handle bound to a named group; all consumer handles
    /// returned for the same `group` share delivery state through the
    /// `Arc` the caller wraps this in.
    pub fn consumer(self: &std::sync::Arc<Self>, group: &str) -> MemoryStreamConsumerHandle {
        MemoryStreamConsumerHandle {
            inner: self.clone(),
            group: group.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// Number of delivered-but-not-yet-acked messages, across all
    /// consumer groups that have read from this stream. Test-only
    /// visibility into redelivery bookkeeping the Redis binding keeps
    /// server-side.
    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamProducer for MemoryStream {
    async fn add(&self, value: StreamValue) -> Result<String, Error> {
        let mut state = self.state.lock().unwrap();
        let id = format!("{}-0", state.next_id);
        state.next_id += 1;
        state.entries.push((id.clone(), value));
        Ok(id)
    }
}

/// A consumer-group-scoped handle onto a shared [`MemoryStream`].
pub struct MemoryStreamConsumerHandle {
    inner: std::sync::Arc<MemoryStream>,
    group: String,
}

#[async_trait]
impl StreamConsumer for MemoryStreamConsumerHandle {
    async fn read(&self, _id: &str, count: usize) -> Result<Vec<StreamMessage>, Error> {
        let mut state = self.inner.state.lock().unwrap();
        let cursor = *state.cursors.get(&self.group).unwrap_or(&0);
        let end = (cursor + count).min(state.entries.len());
        let slice: Vec<(String, StreamValue)> = state.entries[cursor..end].to_vec();
        state.cursors.insert(self.group.clone(), end);
        let mut out = Vec::new();
        for (id, values) in slice {
            state.pending.insert(id.clone(), (id.clone(), values.clone()));
            out.push(StreamMessage { id, values });
        }
        Ok(out)
    }

    async fn ack(&self, id: &str) -> Result<(), Error> {
        self.inner.state.lock().unwrap().pending.remove(id);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// A checkpoint value shared through an `Arc<MemoryCheckpoint>`.
#[derive(Default)]
pub struct MemoryCheckpoint {
    value: Mutex<Option<u64>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpoint for MemoryCheckpoint {
    async fn get(&self) -> Result<Option<u64>, Error> {
        Ok(*self.value.lock().unwrap())
    }

    async fn set(&self, value: u64) -> Result<(), Error> {
        *self.value.lock().unwrap() = Some(value);
        Ok(())
    }
}

/// An in-memory `Store`, enforcing the same uniqueness/guard semantics
/// as the Postgres schema (spec §3/§6) without SQL.
#[derive(Default)]
pub struct MemoryStore {
    blocks: Mutex<Vec<Block>>,
    transactions: Mutex<HashMap<String, Transaction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_block(&self, block: &Block) -> Result<bool, Error> {
        let mut blocks = self.blocks.lock().unwrap();
        if blocks
            .iter()
            .any(|b| b.number == block.number && b.hash == block.hash)
        {
            return Ok(false);
        }
        blocks.push(block.clone());
        Ok(true)
    }

    async fn save_transactions(&self, transactions: &[Transaction]) -> Result<(), Error> {
        let mut store = self.transactions.lock().unwrap();
        for t in transactions {
            store.entry(t.hash.clone()).or_insert_with(|| t.clone());
        }
        Ok(())
    }

    async fn unfinalized_candidates(&self, offset: u32) -> Result<Vec<BlockCandidate>, Error> {
        let blocks = self.blocks.lock().unwrap();
        let mut candidates: Vec<&Block> = blocks
            .iter()
            .filter(|b| matches!(b.status, crate::model::BlockStatus::Unfinalized) && !b.is_uncle)
            .collect();
        candidates.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(candidates
            .into_iter()
            .skip(offset as usize)
            .map(|b| BlockCandidate {
                number: b.number,
                hash: b.hash.clone(),
            })
            .collect())
    }

    async fn finalize_block(&self, number: u64, hash: &str) -> Result<bool, Error> {
        let mut blocks = self.blocks.lock().unwrap();
        for b in blocks.iter_mut() {
            if b.number == number
                && b.hash == hash
                && matches!(b.status, crate::model::BlockStatus::Unfinalized)
            {
                b.status = crate::model::BlockStatus::Finalized;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn reconcile_uncle(
        &self,
        uncled_number: u64,
        uncled_hash: &str,
        republish: BoxFuture<'_, Result<(), Error>>,
    ) -> Result<(), Error> {
        {
            let mut blocks = self.blocks.lock().unwrap();
            let target = blocks.iter_mut().find(|b| {
                b.number == uncled_number
                    && b.hash == uncled_hash
                    && matches!(b.status, crate::model::BlockStatus::Unfinalized)
            });
            let target = match target {
                Some(b) => b,
                None => {
                    return Err(Error::store(format!(
                        "block {uncled_number}/{uncled_hash} was not unfinalized; refusing to uncle it"
                    )))
                }
            };
            target.is_uncle = true;
            target.status = crate::model::BlockStatus::Finalized;
        }

        republish.await
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, Error> {
        let blocks = self.blocks.lock().unwrap();
        Ok(blocks
            .iter()
            .filter(|b| b.number == number && !b.is_uncle)
            .max_by_key(|b| b.timestamp)
            .cloned())
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, Error> {
        let blocks = self.blocks.lock().unwrap();
        Ok(blocks.iter().find(|b| b.hash == hash).cloned())
    }

    async fn recent_blocks(&self, limit: u32) -> Result<Vec<Block>, Error> {
        let blocks = self.blocks.lock().unwrap();
        let mut out: Vec<Block> = blocks.iter().filter(|b| !b.is_uncle).cloned().collect();
        out.sort_by(|a, b| b.number.cmp(&a.number));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn transactions_for_block(&self, block_hash: &str) -> Result<Vec<String>, Error> {
        let transactions = self.transactions.lock().unwrap();
        Ok(transactions
            .values()
            .filter(|t| t.block_hash == block_hash)
            .map(|t| t.hash.clone())
            .collect())
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>, Error> {
        Ok(self.transactions.lock().unwrap().get(hash).cloned())
    }
}

/// A scripted `ChainClient` backed by a fixed set of per-height blocks,
/// mutable at runtime so a test can simulate a reorg appearing mid-run.
#[derive(Default)]
pub struct FakeChainClient {
    blocks: Mutex<HashMap<u64, ChainBlock>>,
    receipts: Mutex<HashMap<String, Vec<TransactionLog>>>,
    head: Mutex<u64>,
}

impl FakeChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_block(&self, block: ChainBlock) {
        let mut head = self.head.lock().unwrap();
        if block.number > *head {
            *head = block.number;
        }
        self.blocks.lock().unwrap().insert(block.number, block);
    }

    pub fn set_receipt(&self, tx_hash: &str, logs: Vec<TransactionLog>) {
        self.receipts
            .lock()
            .unwrap()
            .insert(tx_hash.to_string(), logs);
    }
}

#[async_trait]
impl ChainClient for FakeChainClient {
    async fn block_number(&self) -> Result<u64, Error> {
        Ok(*self.head.lock().unwrap())
    }

    async fn block_by_number(&self, number: u64) -> Result<ChainBlock, Error> {
        self.blocks
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| Error::rpc(format!("no fake block at {number}")))
    }

    async fn header_by_numbers(&self, numbers: &[u64]) -> Result<Vec<Option<ChainHeader>>, Error> {
        let blocks = self.blocks.lock().unwrap();
        Ok(numbers
            .iter()
            .map(|n| {
                blocks.get(n).map(|b| ChainHeader {
                    number: b.number,
                    hash: b.hash.clone(),
                })
            })
            .collect())
    }

    async fn transaction_receipts(
        &self,
        hashes: &[String],
    ) -> Result<Vec<Result<Vec<TransactionLog>, Error>>, Error> {
        let receipts = self.receipts.lock().unwrap();
        Ok(hashes
            .iter()
            .map(|h| {
                receipts
                    .get(h)
                    .cloned()
                    .ok_or_else(|| Error::rpc(format!("no fake receipt for {h}")))
            })
            .collect())
    }
}
