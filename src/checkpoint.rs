//! Scanner checkpoint storage (spec §3: `latest_block_number`). A trait
//! seam so the scanner can run against a `MemoryCheckpoint` in tests
//! without a real Redis instance.

use async_trait::async_trait;

use crate::errors::Error;

#[async_trait]
pub trait Checkpoint: Send + Sync {
    async fn get(&self) -> Result<Option<u64>, Error>;
    async fn set(&self, value: u64) -> Result<(), Error>;
}
