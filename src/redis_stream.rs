//! Redis Streams binding for the [`Stream`](crate::stream::Stream) trait
//! set. Mirrors original_source's `pkg.RedisStream`: register the consumer
//! group at construction (tolerating "already exists"), `XADD` to produce,
//! `XREADGROUP` to consume, `XACK` to acknowledge, `XGROUP DELCONSUMER` on
//! close, `XAUTOCLAIM` to reclaim messages idle beyond a threshold.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::StreamReadOptions;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::checkpoint::Checkpoint;
use crate::errors::Error;
use crate::stream::{StreamConsumer, StreamMessage, StreamProducer, StreamValue};

const BUSYGROUP: &str = "BUSYGROUP";

pub struct RedisStreamConfig {
    pub client: ConnectionManager,
    pub stream_name: String,
    /// `None` for a producer-only stream handle (e.g. the scanner's and
    /// validator's `blocks` producer, which never consumes).
    pub group: Option<(String, String)>,
}

pub struct RedisStream {
    conn: Mutex<ConnectionManager>,
    stream_name: String,
    group_name: Option<String>,
    consumer_name: Option<String>,
}

impl RedisStream {
    pub async fn new(cfg: RedisStreamConfig) -> Result<Self, Error> {
        let mut conn = cfg.client;
        let (group_name, consumer_name) = match &cfg.group {
            Some((group, consumer)) => {
                register_consumer(&mut conn, &cfg.stream_name, group, consumer).await?;
                (Some(group.clone()), Some(consumer.clone()))
            }
            None => (None, None),
        };

        Ok(RedisStream {
            conn: Mutex::new(conn),
            stream_name: cfg.stream_name,
            group_name,
            consumer_name,
        })
    }
}

async fn register_consumer(
    conn: &mut ConnectionManager,
    stream: &str,
    group: &str,
    consumer: &str,
) -> Result<(), Error> {
    let created: Result<(), redis::RedisError> =
        conn.xgroup_create_mkstream(stream, group, "$").await;
    if let Err(e) = created {
        if e.code() != Some(BUSYGROUP) {
            return Err(Error::stream(e));
        }
        debug!(stream, group, "consumer group already exists");
    }

    conn.xgroup_createconsumer(stream, group, consumer)
        .await
        .map_err(Error::stream)?;
    Ok(())
}

fn stream_id_to_value(map: &std::collections::HashMap<String, redis::Value>) -> StreamValue {
    let mut out = StreamValue::new();
    for (k, v) in map {
        match redis::from_redis_value::<String>(v) {
            Ok(s) => {
                out.insert(k.clone(), s);
            }
            Err(e) => warn!(field = %k, error = %e, "failed to decode stream field as string"),
        }
    }
    out
}

#[async_trait]
impl StreamProducer for RedisStream {
    async fn add(&self, value: StreamValue) -> Result<String, Error> {
        let items: Vec<(String, String)> = value.into_iter().collect();
        let mut conn = self.conn.lock().await;
        let id: String = conn
            .xadd(&self.stream_name, "*", &items)
            .await
            .map_err(Error::stream)?;
        Ok(id)
    }
}

#[async_trait]
impl StreamConsumer for RedisStream {
    async fn read(&self, id: &str, count: usize) -> Result<Vec<StreamMessage>, Error> {
        let group = self
            .group_name
            .as_ref()
            .ok_or_else(|| Error::stream("read requires a consumer group"))?;
        let consumer = self.consumer_name.as_ref().expect("set alongside group");

        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(0);

        let mut conn = self.conn.lock().await;
        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[self.stream_name.as_str()], &[id], &opts)
            .await
            .map_err(Error::stream)?;

        let mut out = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                out.push(StreamMessage {
                    id: entry.id.clone(),
                    values: stream_id_to_value(&entry.map),
                });
            }
        }
        Ok(out)
    }

    async fn ack(&self, id: &str) -> Result<(), Error> {
        let group = self
            .group_name
            .as_ref()
            .ok_or_else(|| Error::stream("ack requires a consumer group"))?;
        let mut conn = self.conn.lock().await;
        let _: i64 = conn
            .xack(&self.stream_name, group, &[id])
            .await
            .map_err(Error::stream)?;
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        if let (Some(group), Some(consumer)) = (&self.group_name, &self.consumer_name) {
            let mut conn = self.conn.lock().await;
            let _: i64 = conn
                .xgroup_delconsumer(&self.stream_name, group, consumer)
                .await
                .map_err(Error::stream)?;
        }
        Ok(())
    }

    /// Reclaims messages idle beyond `min_idle`, handing them back to this
    /// consumer (spec §4.2: a crashed consumer's in-flight work resumes).
    async fn reclaim_idle(&self, min_idle: Duration) -> Result<Vec<StreamMessage>, Error> {
        let group = self
            .group_name
            .as_ref()
            .ok_or_else(|| Error::stream("reclaim_idle requires a consumer group"))?;
        let consumer = self.consumer_name.as_ref().expect("set alongside group");

        let mut conn = self.conn.lock().await;
        let reply: redis::streams::StreamAutoClaimReply = conn
            .xautoclaim(
                &self.stream_name,
                group,
                consumer,
                min_idle.as_millis() as u64,
                "0-0",
            )
            .await
            .map_err(Error::stream)?;

        Ok(reply
            .claimed
            .into_iter()
            .map(|id| StreamMessage {
                id: id.id,
                values: stream_id_to_value(&id.map),
            })
            .collect())
    }
}

/// Checkpoint storage backed by plain Redis `GET`/`SET` (spec §3).
pub struct RedisCheckpoint {
    conn: Mutex<ConnectionManager>,
    key: String,
}

impl RedisCheckpoint {
    pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn: Mutex::new(conn),
            key: key.into(),
        }
    }

    pub async fn get(&self) -> Result<Option<u64>, Error> {
        let mut conn = self.conn.lock().await;
        let value: Option<u64> = conn.get(&self.key).await.map_err(Error::stream)?;
        Ok(value)
    }

    pub async fn set(&self, value: u64) -> Result<(), Error> {
        let mut conn = self.conn.lock().await;
        let _: () = conn.set(&self.key, value).await.map_err(Error::stream)?;
        Ok(())
    }
}

#[async_trait]
impl Checkpoint for RedisCheckpoint {
    async fn get(&self) -> Result<Option<u64>, Error> {
        RedisCheckpoint::get(self).await
    }

    async fn set(&self, value: u64) -> Result<(), Error> {
        RedisCheckpoint::set(self, value).await
    }
}
