//! Validator: independently re-checks unfinalized blocks against the
//! chain's current canonical header at that height, finalizing blocks
//! that still match and reconciling the ones that don't as uncles
//! (spec §4.4).
//!
//! Candidates are read `ORDER BY timestamp DESC OFFSET finality_offset`
//! — the same clause original_source uses — so the validator only ever
//! looks at blocks old enough to plausibly have settled, skipping the
//! still-too-recent tail the scanner just produced.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::errors::Error;
use crate::metrics;
use crate::model::{BlockStatus, BlockWorkItem};
use crate::store::Store;
use crate::stream::StreamProducer;

pub struct Validator<C, S, P> {
    chain: Arc<C>,
    store: Arc<S>,
    blocks_producer: Arc<P>,
    finality_offset: u32,
}

impl<C, S, P> Validator<C, S, P>
where
    C: ChainClient,
    S: Store,
    P: StreamProducer,
{
    pub fn new(chain: Arc<C>, store: Arc<S>, blocks_producer: Arc<P>, finality_offset: u32) -> Self {
        Validator {
            chain,
            store,
            blocks_producer,
            finality_offset,
        }
    }

    pub async fn run(
        &self,
        cancel: CancellationToken,
        watch_interval: Duration,
    ) -> Result<(), Error> {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            if let Err(e) = self.tick().await {
                warn!(error = %e, "validator tick failed, will retry next interval");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(watch_interval) => {}
            }
        }
        Ok(())
    }

    /// Reviews every current candidate once. Returns the number of
    /// uncles reconciled.
    pub async fn tick(&self) -> Result<u32, Error> {
        let candidates = self
            .store
            .unfinalized_candidates(self.finality_offset)
            .await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let numbers: Vec<u64> = candidates.iter().map(|c| c.number).collect();
        let headers = self.chain.header_by_numbers(&numbers).await?;

        let mut uncled = 0;
        for (candidate, header) in candidates.into_iter().zip(headers) {
            let header = match header {
                Some(h) => h,
                None => {
                    warn!(number = candidate.number, "no canonical header at this height yet, skipping");
                    continue;
                }
            };

            if header.hash == candidate.hash {
                let finalized = self
                    .store
                    .finalize_block(candidate.number, &candidate.hash)
                    .await?;
                if finalized {
                    metrics::BLOCKS_PROCESSED
                        .with_label_values(&["validator_finalized"])
                        .inc();
                }
                continue;
            }

            info!(
                number = candidate.number,
                stale_hash = %candidate.hash,
                canonical_hash = %header.hash,
                "unfinalized block was replaced on-chain, reconciling as uncle"
            );

            // Block Processor re-fetches hash/parent/timestamp/transactions
            // from this height anyway, so the republished message only
            // needs to carry the height and its new status (spec §4.4
            // step 5) — no extra fetch here.
            let work = BlockWorkItem {
                number: candidate.number,
                status: BlockStatus::Finalized,
            };

            let stream_value = work.to_stream_value();
            let producer = self.blocks_producer.clone();
            let republish: futures::future::BoxFuture<'_, Result<(), Error>> =
                Box::pin(async move { producer.add(stream_value).await.map(|_| ()) });
            self.store
                .reconcile_uncle(candidate.number, &candidate.hash, republish)
                .await?;

            metrics::REORGS_DETECTED
                .with_label_values(&["validator"])
                .inc();
            uncled += 1;
        }

        Ok(uncled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainBlock;
    use crate::fakes::{FakeChainClient, MemoryStore, MemoryStream};
    use crate::model::Block;

    fn chain_block(number: u64, hash: &str) -> ChainBlock {
        ChainBlock {
            number,
            hash: hash.into(),
            parent_hash: format!("0xparent{number}"),
            timestamp: 1_700_000_000 + number,
            transactions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn finalizes_block_that_still_matches_canonical_header() {
        let chain = Arc::new(FakeChainClient::new());
        chain.set_block(chain_block(10, "0xcanonical"));

        let store = Arc::new(MemoryStore::new());
        store
            .save_block(&Block {
                number: 10,
                hash: "0xcanonical".into(),
                parent_hash: "0xparent10".into(),
                timestamp: 1_700_000_010,
                status: BlockStatus::Unfinalized,
                is_uncle: false,
            })
            .await
            .unwrap();

        let blocks_stream = Arc::new(MemoryStream::new());
        let validator = Validator::new(chain, store.clone(), blocks_stream, 0);
        let uncled = validator.tick().await.unwrap();

        assert_eq!(uncled, 0);
        let block = store.block_by_number(10).await.unwrap().unwrap();
        assert_eq!(block.status, BlockStatus::Finalized);
    }

    #[tokio::test]
    async fn reconciles_stale_block_as_uncle_and_republishes_canonical_replacement() {
        let chain = Arc::new(FakeChainClient::new());
        chain.set_block(chain_block(10, "0xnew"));

        let store = Arc::new(MemoryStore::new());
        store
            .save_block(&Block {
                number: 10,
                hash: "0xold".into(),
                parent_hash: "0xparent10".into(),
                timestamp: 1_700_000_010,
                status: BlockStatus::Unfinalized,
                is_uncle: false,
            })
            .await
            .unwrap();

        let blocks_stream = Arc::new(MemoryStream::new());
        let consumer = blocks_stream.consumer("republish-check");
        let validator = Validator::new(chain, store.clone(), blocks_stream.clone(), 0);
        let uncled = validator.tick().await.unwrap();

        assert_eq!(uncled, 1);
        let old = store.block_by_hash("0xold").await.unwrap().unwrap();
        assert!(old.is_uncle);
        assert_eq!(old.status, BlockStatus::Finalized);

        // The validator republishes only {number, status} — re-fetching
        // and persisting the canonical replacement is Block Processor's
        // job downstream, not the validator's.
        assert_eq!(blocks_stream.len(), 1);
        use crate::stream::StreamConsumer as _;
        let messages = consumer.read(">", 10).await.unwrap();
        let republished = BlockWorkItem::from_stream_value(&messages[0].values).unwrap();
        assert_eq!(republished.number, 10);
        assert_eq!(republished.status, BlockStatus::Finalized);
    }
}
