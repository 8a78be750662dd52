//! Block Processor: consumes the `blocks` stream, fetches each block with
//! its transactions from the chain, persists the block, and fans the
//! transactions out onto the `transactions` stream (spec §4.2).
//!
//! The `blocks` message only carries `{number, status}` (spec §6) — the
//! scanner never fetches block bodies, so this is the first stage that
//! sees the hash, parent hash, timestamp and transaction list at all.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chain::ChainClient;
use crate::errors::Error;
use crate::metrics;
use crate::model::Block;
use crate::model::BlockWorkItem;
use crate::stream::{StreamConsumer, StreamMessage, StreamProducer};
use crate::worker_pool::Pool;

/// Threshold past which a pending (delivered, unacked) message is assumed
/// to belong to a crashed consumer and is safe to reclaim (spec §4.2
/// point 3).
const IDLE_RECLAIM_THRESHOLD: Duration = Duration::from_secs(600);

pub struct BlockProcessor<C, S, P, Cons> {
    chain: Arc<C>,
    store: Arc<S>,
    tx_producer: Arc<P>,
    consumer: Arc<Cons>,
    concurrency: usize,
}

impl<C, S, P, Cons> BlockProcessor<C, S, P, Cons>
where
    C: ChainClient + 'static,
    S: crate::store::Store + 'static,
    P: StreamProducer + 'static,
    Cons: StreamConsumer + 'static,
{
    pub fn new(
        chain: Arc<C>,
        store: Arc<S>,
        tx_producer: Arc<P>,
        consumer: Arc<Cons>,
        concurrency: usize,
    ) -> Self {
        BlockProcessor {
            chain,
            store,
            tx_producer,
            consumer,
            concurrency,
        }
    }

    pub async fn run(
        self: Arc<Self>,
        cancel: CancellationToken,
        batch_count: usize,
    ) -> Result<(), Error> {
        let worker = self.clone();
        let pool: Pool<StreamMessage> =
            Pool::new(self.concurrency, self.concurrency * 4, move |msg| {
                let worker = worker.clone();
                async move { worker.process_message(msg).await }
            });

        match self.consumer.reclaim_idle(IDLE_RECLAIM_THRESHOLD).await {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                info!(
                    count = reclaimed.len(),
                    "reclaimed idle blocks messages from a crashed consumer"
                );
                for message in reclaimed {
                    if pool.submit(message).await.is_err() {
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to reclaim idle blocks messages on startup"),
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let messages = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.consumer.read(">", batch_count) => match result {
                    Ok(messages) => messages,
                    Err(e) => {
                        warn!(error = %e, "failed to read from blocks stream, retrying");
                        Vec::new()
                    }
                },
            };

            if messages.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                }
                continue;
            }

            metrics::QUEUE_DEPTH
                .with_label_values(&["block_processor"])
                .set(messages.len() as i64);

            for message in messages {
                if pool.submit(message).await.is_err() {
                    break;
                }
            }
        }

        pool.stop().await;
        self.consumer.close().await?;
        Ok(())
    }

    async fn process_message(&self, message: StreamMessage) {
        match self.handle(&message).await {
            Ok(()) => match self.consumer.ack(&message.id).await {
                Ok(()) => metrics::ACKS
                    .with_label_values(&["blocks", "ack"])
                    .inc(),
                Err(e) => error!(message_id = %message.id, error = %e, "failed to ack block message"),
            },
            Err(e) => {
                metrics::ACKS
                    .with_label_values(&["blocks", "error"])
                    .inc();
                error!(message_id = %message.id, error = %e, "failed to process block message");
            }
        }
    }

    async fn handle(&self, message: &StreamMessage) -> Result<(), Error> {
        let work = BlockWorkItem::from_stream_value(&message.values)?;
        let chain_block = self.chain.block_by_number(work.number).await?;

        let block = Block {
            number: chain_block.number,
            hash: chain_block.hash.clone(),
            parent_hash: chain_block.parent_hash.clone(),
            timestamp: chain_block.timestamp,
            status: work.status,
            is_uncle: false,
        };
        self.store.save_block(&block).await?;
        metrics::BLOCKS_PROCESSED
            .with_label_values(&["block_processor"])
            .inc();

        for tx in &chain_block.transactions {
            self.tx_producer.add(tx.to_stream_value()).await?;
        }
        metrics::TRANSACTIONS_PROCESSED
            .with_label_values(&["block_processor"])
            .inc_by(chain_block.transactions.len() as u64);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainBlock;
    use crate::fakes::{FakeChainClient, MemoryStore, MemoryStream};
    use crate::model::{BlockStatus, Transaction};
    use crate::stream::StreamProducer as _;

    fn chain_block_with_tx(number: u64) -> ChainBlock {
        ChainBlock {
            number,
            hash: format!("0xhash{number}"),
            parent_hash: format!("0xhash{}", number.saturating_sub(1)),
            timestamp: 1_700_000_000 + number,
            transactions: vec![Transaction {
                index: 0,
                hash: format!("0xtx{number}"),
                from: "0xsender".into(),
                to: Some("0xrecipient".into()),
                nonce: 1,
                data: "0x".into(),
                value: "0".into(),
                logs: Vec::new(),
                block_hash: format!("0xhash{number}"),
                block_number: number,
            }],
        }
    }

    #[tokio::test]
    async fn persists_block_and_fans_out_transactions_then_acks() {
        let chain = Arc::new(FakeChainClient::new());
        chain.set_block(chain_block_with_tx(10));

        let store = Arc::new(MemoryStore::new());
        let tx_stream = Arc::new(MemoryStream::new());
        let blocks_stream = Arc::new(MemoryStream::new());
        let consumer = Arc::new(blocks_stream.consumer("block-processors"));

        let scanned = BlockWorkItem {
            number: 10,
            status: BlockStatus::Unfinalized,
        };
        blocks_stream.add(scanned.to_stream_value()).await.unwrap();

        let processor = BlockProcessor::new(chain, store.clone(), tx_stream.clone(), consumer, 2);
        let message = {
            use crate::stream::StreamConsumer as _;
            let mut m = processor.consumer.read(">", 10).await.unwrap();
            m.remove(0)
        };
        processor.handle(&message).await.unwrap();

        assert!(store.block_by_number(10).await.unwrap().is_some());
        assert_eq!(tx_stream.len(), 1);
    }

    #[tokio::test]
    async fn run_calls_reclaim_idle_on_startup_before_reading_new_messages() {
        let chain = Arc::new(FakeChainClient::new());
        let store = Arc::new(MemoryStore::new());
        let tx_stream = Arc::new(MemoryStream::new());
        let blocks_stream = Arc::new(MemoryStream::new());
        let consumer = Arc::new(blocks_stream.consumer("block-processors"));

        // Deliver then never ack, simulating a crashed consumer's leftover
        // pending entry; `MemoryStream` has no real idle-reclaim semantics
        // (it defaults to the trait's no-op), so this only proves
        // `BlockProcessor::run` reaches the call without erroring.
        let work = BlockWorkItem {
            number: 10,
            status: BlockStatus::Unfinalized,
        };
        blocks_stream.add(work.to_stream_value()).await.unwrap();
        {
            use crate::stream::StreamConsumer as _;
            consumer.read(">", 10).await.unwrap();
        }
        assert_eq!(blocks_stream.pending_count(), 1);

        let processor = Arc::new(BlockProcessor::new(chain, store, tx_stream, consumer, 2));
        let cancel = CancellationToken::new();
        cancel.cancel();
        processor.run(cancel, 10).await.unwrap();
    }
}
