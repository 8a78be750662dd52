//! Relational persistence, per spec §3/§6. `Store` is a trait seam so a
//! `MemoryStore` fake can back tests without a live Postgres instance,
//! mirroring the teacher's preference for trait-object abstractions over
//! concrete types at component boundaries.

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row};

use crate::errors::Error;
use crate::metrics;
use crate::model::{Block, BlockCandidate, BlockStatus, Transaction, TransactionLog};

#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts a block if `(number, hash)` isn't already present. Returns
    /// `true` if a new row was inserted.
    async fn save_block(&self, block: &Block) -> Result<bool, Error>;

    /// Inserts transactions whose `hash` isn't already present, skipping
    /// duplicates silently (spec §3: insertion is idempotent).
    async fn save_transactions(&self, transactions: &[Transaction]) -> Result<(), Error>;

    /// Candidate blocks for reorg review: unfinalized rows beyond the
    /// finality offset, oldest-checked-last (spec §4.4,
    /// `ORDER BY timestamp DESC OFFSET R`).
    async fn unfinalized_candidates(&self, offset: u32) -> Result<Vec<BlockCandidate>, Error>;

    /// Transitions a block to `finalized`, guarded by its current status
    /// so a concurrent validator run can't double-finalize.
    async fn finalize_block(&self, number: u64, hash: &str) -> Result<bool, Error>;

    /// Marks `(number, hash)` as an uncle in the same transaction as
    /// awaiting `republish` (expected to append the canonical
    /// replacement's `{number, status}` to the `blocks` stream so Block
    /// Processor re-ingests it) before committing. Rolls back on any
    /// failure, including `republish` resolving to an error. The
    /// replacement block itself is not written here — Block Processor
    /// persists it when the republished message comes back around.
    async fn reconcile_uncle(
        &self,
        uncled_number: u64,
        uncled_hash: &str,
        republish: BoxFuture<'_, Result<(), Error>>,
    ) -> Result<(), Error>;

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, Error>;
    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, Error>;
    async fn recent_blocks(&self, limit: u32) -> Result<Vec<Block>, Error>;
    async fn transactions_for_block(&self, block_hash: &str) -> Result<Vec<String>, Error>;
    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>, Error>;
}

pub struct PgStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct BlockRow {
    number: i64,
    hash: String,
    parent_hash: String,
    timestamp: i64,
    status: String,
    is_uncle: bool,
}

impl TryFrom<BlockRow> for Block {
    type Error = Error;

    fn try_from(row: BlockRow) -> Result<Self, Error> {
        Ok(Block {
            number: row.number as u64,
            hash: row.hash,
            parent_hash: row.parent_hash,
            timestamp: row.timestamp as u64,
            status: row.status.parse()?,
            is_uncle: row.is_uncle,
        })
    }
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(Error::store)?;
        Ok(Self { pool })
    }

    /// Runs the schema migration described in spec §6. Safe to call on
    /// every startup; every statement is `IF NOT EXISTS`.
    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blocks (
                number BIGINT NOT NULL,
                hash TEXT NOT NULL,
                parent_hash TEXT NOT NULL,
                timestamp BIGINT NOT NULL,
                status TEXT NOT NULL,
                is_uncle BOOLEAN NOT NULL DEFAULT FALSE,
                UNIQUE (number, hash)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::store)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS blocks_timestamp_idx ON blocks (timestamp)")
            .execute(&self.pool)
            .await
            .map_err(Error::store)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                hash TEXT PRIMARY KEY,
                index BIGINT NOT NULL,
                "from" TEXT NOT NULL,
                "to" TEXT,
                nonce BIGINT NOT NULL,
                data TEXT NOT NULL,
                value TEXT NOT NULL,
                logs JSONB NOT NULL DEFAULT '[]',
                block_hash TEXT NOT NULL,
                block_number BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::store)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS transactions_block_hash_idx ON transactions (block_hash)",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::store)?;

        Ok(())
    }

    async fn transaction_from_row(row: &sqlx::postgres::PgRow) -> Result<Transaction, Error> {
        let logs_json: sqlx::types::Json<Vec<TransactionLog>> =
            row.try_get("logs").map_err(Error::store)?;
        Ok(Transaction {
            index: row.try_get::<i64, _>("index").map_err(Error::store)? as u64,
            hash: row.try_get("hash").map_err(Error::store)?,
            from: row.try_get("from").map_err(Error::store)?,
            to: row.try_get("to").map_err(Error::store)?,
            nonce: row.try_get::<i64, _>("nonce").map_err(Error::store)? as u64,
            data: row.try_get("data").map_err(Error::store)?,
            value: row.try_get("value").map_err(Error::store)?,
            logs: logs_json.0,
            block_hash: row.try_get("block_hash").map_err(Error::store)?,
            block_number: row.try_get::<i64, _>("block_number").map_err(Error::store)? as u64,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn save_block(&self, block: &Block) -> Result<bool, Error> {
        let _timer = metrics::STORE_CALL_DURATION
            .with_label_values(&["save_block"])
            .start_timer();
        let result = sqlx::query(
            r#"
            INSERT INTO blocks (number, hash, parent_hash, timestamp, status, is_uncle)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (number, hash) DO NOTHING
            "#,
        )
        .bind(block.number as i64)
        .bind(&block.hash)
        .bind(&block.parent_hash)
        .bind(block.timestamp as i64)
        .bind(block.status.as_str())
        .bind(block.is_uncle)
        .execute(&self.pool)
        .await
        .map_err(Error::store)?;

        Ok(result.rows_affected() > 0)
    }

    /// Builds and executes one parameterized multi-row `INSERT ... VALUES
    /// (...), (...), ...` spanning the whole batch (spec §4.3: "a single
    /// SQL multi-row insert ... keeps DB round-trips O(1) per batch"),
    /// rather than one round trip per transaction.
    async fn save_transactions(&self, transactions: &[Transaction]) -> Result<(), Error> {
        if transactions.is_empty() {
            return Ok(());
        }
        let _timer = metrics::STORE_CALL_DURATION
            .with_label_values(&["save_transactions"])
            .start_timer();

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"INSERT INTO transactions (hash, index, "from", "to", nonce, data, value, logs, block_hash, block_number) "#,
        );
        builder.push_values(transactions, |mut row, t| {
            row.push_bind(&t.hash)
                .push_bind(t.index as i64)
                .push_bind(&t.from)
                .push_bind(&t.to)
                .push_bind(t.nonce as i64)
                .push_bind(&t.data)
                .push_bind(&t.value)
                .push_bind(sqlx::types::Json(&t.logs))
                .push_bind(&t.block_hash)
                .push_bind(t.block_number as i64);
        });
        builder.push(" ON CONFLICT (hash) DO NOTHING");

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(Error::store)?;
        Ok(())
    }

    async fn unfinalized_candidates(&self, offset: u32) -> Result<Vec<BlockCandidate>, Error> {
        let _timer = metrics::STORE_CALL_DURATION
            .with_label_values(&["unfinalized_candidates"])
            .start_timer();
        let rows = sqlx::query(
            r#"
            SELECT number, hash FROM blocks
            WHERE status = 'unfinalized' AND is_uncle = FALSE
            ORDER BY timestamp DESC
            OFFSET $1
            "#,
        )
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::store)?;

        rows.into_iter()
            .map(|row| {
                Ok(BlockCandidate {
                    number: row.try_get::<i64, _>("number").map_err(Error::store)? as u64,
                    hash: row.try_get("hash").map_err(Error::store)?,
                })
            })
            .collect()
    }

    async fn finalize_block(&self, number: u64, hash: &str) -> Result<bool, Error> {
        let _timer = metrics::STORE_CALL_DURATION
            .with_label_values(&["finalize_block"])
            .start_timer();
        let result = sqlx::query(
            r#"
            UPDATE blocks SET status = 'finalized'
            WHERE number = $1 AND hash = $2 AND status = 'unfinalized'
            "#,
        )
        .bind(number as i64)
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(Error::store)?;
        Ok(result.rows_affected() > 0)
    }

    async fn reconcile_uncle(
        &self,
        uncled_number: u64,
        uncled_hash: &str,
        republish: BoxFuture<'_, Result<(), Error>>,
    ) -> Result<(), Error> {
        let _timer = metrics::STORE_CALL_DURATION
            .with_label_values(&["reconcile_uncle"])
            .start_timer();
        let mut tx = self.pool.begin().await.map_err(Error::store)?;

        let result = sqlx::query(
            r#"
            UPDATE blocks SET status = 'finalized', is_uncle = TRUE
            WHERE number = $1 AND hash = $2 AND status = 'unfinalized'
            "#,
        )
        .bind(uncled_number as i64)
        .bind(uncled_hash)
        .execute(&mut *tx)
        .await
        .map_err(Error::store)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(Error::store)?;
            return Err(Error::store(format!(
                "block {uncled_number}/{uncled_hash} was not unfinalized; refusing to uncle it"
            )));
        }

        if let Err(e) = republish.await {
            tx.rollback().await.map_err(Error::store)?;
            return Err(e);
        }

        tx.commit().await.map_err(Error::store)?;
        Ok(())
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, Error> {
        let _timer = metrics::STORE_CALL_DURATION
            .with_label_values(&["block_by_number"])
            .start_timer();
        let row: Option<BlockRow> = sqlx::query_as(
            "SELECT number, hash, parent_hash, timestamp, status, is_uncle FROM blocks
             WHERE number = $1 AND is_uncle = FALSE
             ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(number as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::store)?;
        row.map(Block::try_from).transpose()
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, Error> {
        let _timer = metrics::STORE_CALL_DURATION
            .with_label_values(&["block_by_hash"])
            .start_timer();
        let row: Option<BlockRow> = sqlx::query_as(
            "SELECT number, hash, parent_hash, timestamp, status, is_uncle FROM blocks
             WHERE hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::store)?;
        row.map(Block::try_from).transpose()
    }

    async fn recent_blocks(&self, limit: u32) -> Result<Vec<Block>, Error> {
        let _timer = metrics::STORE_CALL_DURATION
            .with_label_values(&["recent_blocks"])
            .start_timer();
        let rows: Vec<BlockRow> = sqlx::query_as(
            "SELECT number, hash, parent_hash, timestamp, status, is_uncle FROM blocks
             WHERE is_uncle = FALSE
             ORDER BY number DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::store)?;
        rows.into_iter().map(Block::try_from).collect()
    }

    async fn transactions_for_block(&self, block_hash: &str) -> Result<Vec<String>, Error> {
        let _timer = metrics::STORE_CALL_DURATION
            .with_label_values(&["transactions_for_block"])
            .start_timer();
        let rows = sqlx::query("SELECT hash FROM transactions WHERE block_hash = $1")
            .bind(block_hash)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::store)?;
        rows.into_iter()
            .map(|row| row.try_get("hash").map_err(Error::store))
            .collect()
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>, Error> {
        let _timer = metrics::STORE_CALL_DURATION
            .with_label_values(&["transaction_by_hash"])
            .start_timer();
        let row = sqlx::query("SELECT * FROM transactions WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::store)?;
        match row {
            Some(row) => Ok(Some(Self::transaction_from_row(&row).await?)),
            None => Ok(None),
        }
    }
}
