//! Scanner: walks the chain head forward from the last checkpoint,
//! appending each new block to the `blocks` stream (spec §4.1).
//!
//! A block at height `h` is marked `unfinalized` while the chain head
//! `H` is still within `finality_offset` of it (`h + finality_offset >=
//! H`), `finalized` once it has aged past that window — the validator
//! then owns reconciling any unfinalized block that turns out to be an
//! uncle.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::checkpoint::Checkpoint;
use crate::errors::Error;
use crate::metrics;
use crate::model::{BlockStatus, BlockWorkItem};
use crate::stream::StreamProducer;

pub struct Scanner<C, P, K> {
    chain: Arc<C>,
    stream: Arc<P>,
    checkpoint: Arc<K>,
    start_block_number: u64,
    finality_offset: u64,
}

impl<C, P, K> Scanner<C, P, K>
where
    C: ChainClient,
    P: StreamProducer,
    K: Checkpoint,
{
    pub fn new(
        chain: Arc<C>,
        stream: Arc<P>,
        checkpoint: Arc<K>,
        start_block_number: u64,
        finality_offset: u64,
    ) -> Self {
        Scanner {
            chain,
            stream,
            checkpoint,
            start_block_number,
            finality_offset,
        }
    }

    /// Runs until `cancel` fires, producing a new range of blocks every
    /// `watch_interval`.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        watch_interval: Duration,
    ) -> Result<(), Error> {
        let mut next = self.resume_height().await?;
        let mut last_emitted_this_run: Option<u64> = None;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.produce_range(next, &cancel).await {
                Ok(Some(last)) => {
                    next = last + 1;
                    last_emitted_this_run = Some(last);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "scan tick failed, will retry next interval"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(watch_interval) => {}
            }
        }

        // Only touch the checkpoint if this run actually emitted something;
        // otherwise there is nothing new to persist and doing so risks
        // recording a height that was never produced (e.g. a fresh start
        // whose first tick errored before cancellation).
        if let Some(last) = last_emitted_this_run {
            self.checkpoint.set(last).await?;
            info!(checkpoint = last, "scanner stopped");
        } else {
            info!("scanner stopped without emitting any new blocks this run");
        }
        Ok(())
    }

    async fn resume_height(&self) -> Result<u64, Error> {
        match self.checkpoint.get().await? {
            Some(checkpoint) if checkpoint > 0 => Ok(checkpoint + 1),
            _ => Ok(self.start_block_number),
        }
    }

    /// Produces every block from `from` up to the current chain head,
    /// inclusive, writing the checkpoint once after the whole range
    /// lands (or once after whatever prefix of it completed before
    /// `cancel` fired). Returns the last height emitted, if any.
    ///
    /// Only the height and finality tag are emitted here — fetching the
    /// block body is Block Processor's job (spec §4.2 point 1).
    pub async fn produce_range(
        &self,
        from: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<u64>, Error> {
        let head = self.chain.block_number().await?;
        if from > head {
            return Ok(None);
        }

        let mut last_emitted = None;
        for number in from..=head {
            if cancel.is_cancelled() {
                break;
            }

            let status = if number + self.finality_offset >= head {
                BlockStatus::Unfinalized
            } else {
                BlockStatus::Finalized
            };

            let item = BlockWorkItem { number, status };

            self.stream.add(item.to_stream_value()).await?;
            metrics::BLOCKS_PROCESSED
                .with_label_values(&["scanner"])
                .inc();
            last_emitted = Some(number);
        }

        if let Some(last) = last_emitted {
            self.checkpoint.set(last).await?;
            metrics::CHECKPOINT_HEIGHT
                .with_label_values(&["scanner"])
                .set(last as i64);
        }

        Ok(last_emitted)
    }
}
