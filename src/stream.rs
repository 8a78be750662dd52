//! Stream abstraction: the only channel of coordination between stages
//! (spec §9 — "no in-process queues spanning services"). Kept
//! interface-defined, mirroring original_source's `pkg.Stream` /
//! `StreamProducer` / `StreamConsumer`, so a fake in-memory implementation
//! can power tests while the production binaries bind to Redis Streams.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Error;

/// A stream message payload. Every field is string-encoded on the wire
/// (spec §6), so a plain string map is enough.
pub type StreamValue = HashMap<String, String>;

#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub values: StreamValue,
}

#[async_trait]
pub trait StreamProducer: Send + Sync {
    /// Appends a message, returning the broker-assigned id.
    async fn add(&self, value: StreamValue) -> Result<String, Error>;
}

#[async_trait]
pub trait StreamConsumer: Send + Sync {
    /// Reads up to `count` messages with `id` semantics matching the
    /// broker (`">"` for only-new, undelivered messages). Blocks (subject
    /// to cancellation by the caller) when nothing is pending.
    async fn read(&self, id: &str, count: usize) -> Result<Vec<StreamMessage>, Error>;

    /// Acknowledges a message by id.
    async fn ack(&self, id: &str) -> Result<(), Error>;

    /// Deregisters the consumer. An unacked message must survive this —
    /// idle-reclaim keys off message idle time, not consumer registration.
    async fn close(&self) -> Result<(), Error>;

    /// Claims messages idle for at least `min_idle`, handing them back to
    /// this consumer for (re-)processing. Brokers without a notion of
    /// per-consumer delivery state (e.g. an in-process fake) can leave this
    /// at the default no-op.
    async fn reclaim_idle(&self, _min_idle: Duration) -> Result<Vec<StreamMessage>, Error> {
        Ok(Vec::new())
    }
}

pub trait Stream: StreamProducer + StreamConsumer {}
impl<T: StreamProducer + StreamConsumer> Stream for T {}

/// Builds a `StreamValue` from `(&str, impl Into<String>)` pairs — saves
/// call sites from repeating `.to_string()`/`.into()` at every field.
#[macro_export]
macro_rules! stream_value {
    ($($key:expr => $val:expr),* $(,)?) => {{
        let mut map = ::std::collections::HashMap::new();
        $(map.insert($key.to_string(), $val.to_string());)*
        map
    }};
}
