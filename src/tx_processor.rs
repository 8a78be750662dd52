//! Transaction Processor: consumes the `transactions` stream in
//! batches, fetches each batch's receipts with one batched RPC call,
//! and persists the successfully-receipted transactions (spec §4.3).
//!
//! Ack is per-message, not per-batch: a transaction whose receipt call
//! failed is left unacked so redelivery (or idle-reclaim) retries just
//! that one, while the rest of the batch still lands.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::chain::ChainClient;
use crate::errors::Error;
use crate::metrics;
use crate::model::Transaction;
use crate::stream::{StreamConsumer, StreamMessage};
use crate::worker_pool::Pool;

pub struct TxProcessor<C, S, Cons> {
    chain: Arc<C>,
    store: Arc<S>,
    consumer: Arc<Cons>,
    concurrency: usize,
}

impl<C, S, Cons> TxProcessor<C, S, Cons>
where
    C: ChainClient + 'static,
    S: crate::store::Store + 'static,
    Cons: StreamConsumer + 'static,
{
    pub fn new(chain: Arc<C>, store: Arc<S>, consumer: Arc<Cons>, concurrency: usize) -> Self {
        TxProcessor {
            chain,
            store,
            consumer,
            concurrency,
        }
    }

    pub async fn run(
        self: Arc<Self>,
        cancel: CancellationToken,
        batch_size: usize,
    ) -> Result<(), Error> {
        let worker = self.clone();
        let pool: Pool<Vec<StreamMessage>> =
            Pool::new(self.concurrency, self.concurrency * 2, move |batch| {
                let worker = worker.clone();
                async move { worker.process_batch(batch).await }
            });

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let messages = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.consumer.read(">", batch_size) => match result {
                    Ok(messages) => messages,
                    Err(e) => {
                        warn!(error = %e, "failed to read from transactions stream, retrying");
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

            if pool.submit(messages).await.is_err() {
                break;
            }
        }

        pool.stop().await;
        self.consumer.close().await?;
        Ok(())
    }

    async fn process_batch(&self, messages: Vec<StreamMessage>) {
        let mut parsed = Vec::with_capacity(messages.len());
        for message in messages {
            match Transaction::from_stream_value(&message.values) {
                Ok(tx) => parsed.push((message, tx)),
                Err(e) => {
                    error!(message_id = %message.id, error = %e, "malformed transaction message, skipping");
                }
            }
        }
        if parsed.is_empty() {
            return;
        }

        let hashes: Vec<String> = parsed.iter().map(|(_, tx)| tx.hash.clone()).collect();
        let receipts = match self.chain.transaction_receipts(&hashes).await {
            Ok(receipts) => receipts,
            Err(e) => {
                error!(error = %e, batch_size = parsed.len(), "batched receipt call failed, leaving whole batch unacked");
                return;
            }
        };

        let mut to_persist = Vec::with_capacity(parsed.len());
        let mut to_ack = Vec::with_capacity(parsed.len());
        for ((message, mut tx), receipt) in parsed.into_iter().zip(receipts) {
            match receipt {
                Ok(logs) => {
                    tx.logs = logs;
                    to_ack.push(message.id.clone());
                    to_persist.push(tx);
                }
                Err(e) => {
                    error!(message_id = %message.id, tx_hash = %tx.hash, error = %e, "receipt fetch failed, leaving unacked");
                }
            }
        }

        if to_persist.is_empty() {
            return;
        }

        if let Err(e) = self.store.save_transactions(&to_persist).await {
            error!(error = %e, "failed to persist transaction batch, leaving unacked");
            return;
        }
        metrics::TRANSACTIONS_PROCESSED
            .with_label_values(&["tx_processor"])
            .inc_by(to_persist.len() as u64);

        for id in to_ack {
            if let Err(e) = self.consumer.ack(&id).await {
                error!(message_id = %id, error = %e, "failed to ack transaction message");
            } else {
                metrics::ACKS.with_label_values(&["transactions", "ack"]).inc();
            }
        }
    }
}
