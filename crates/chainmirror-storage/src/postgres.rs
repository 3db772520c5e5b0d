//! PostgreSQL storage backend for ChainMirror.
//!
//! Persists blocks, transactions, events and filters. Uses `sqlx` with a
//! connection pool; each block is written in one database transaction and
//! announced with `pg_notify` on [`NEW_BLOCK_CHANNEL`] before commit, so the
//! notification is delivered only if the block is visible.
//!
//! # Feature Flag
//! Requires the `postgres` feature:
//! ```toml
//! chainmirror-storage = { version = "0.2", features = ["postgres"] }
//! ```
//!
//! # Schema
//! Created on connect if missing:
//! - `chainmirror_blocks`: one row per height, keyed by number
//! - `chainmirror_transactions`: unique by hash and by (block, index)
//! - `chainmirror_events`: topics as `BYTEA[]`, global `BIGSERIAL` id
//! - `chainmirror_filters`: server-side filters with their cursors
//!
//! Integers that may exceed 63 bits (`value`, signature parts, header
//! quantities) are stored as `NUMERIC` and read back as text.

use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chainmirror_core::config::StoreConfig;
use chainmirror_core::error::MirrorError;
use chainmirror_core::filter::{FilterKind, FilterRecord, LogFilterParams, NewFilter};
use chainmirror_core::quantity::{from_decimal, from_i64, to_decimal, to_i64, u64_from_decimal};
use chainmirror_core::store::{BlockPredicate, LogQuery, Store, NEW_BLOCK_CHANNEL};
use chainmirror_core::topics::Predicate;
use chainmirror_core::types::{Block, BlockBundle, LogEntry, Transaction, TransactionData};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS chainmirror_blocks (
        number            BIGINT  PRIMARY KEY,
        hash              BYTEA   NOT NULL UNIQUE,
        parent_hash       BYTEA   NOT NULL,
        timestamp         NUMERIC NOT NULL,
        size              NUMERIC NOT NULL,
        gas_limit         NUMERIC NOT NULL,
        gas_used          NUMERIC NOT NULL,
        transactions_root BYTEA   NOT NULL,
        state_root        BYTEA   NOT NULL,
        receipts_root     BYTEA   NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chainmirror_transactions (
        id           BIGSERIAL     PRIMARY KEY,
        block_number BIGINT        NOT NULL REFERENCES chainmirror_blocks(number),
        tx_index     INTEGER       NOT NULL,
        hash         BYTEA         NOT NULL UNIQUE,
        from_address BYTEA         NOT NULL,
        to_address   BYTEA,
        nonce        NUMERIC       NOT NULL,
        value        NUMERIC(78,0) NOT NULL,
        input        BYTEA         NOT NULL,
        v            NUMERIC(78,0) NOT NULL,
        r            NUMERIC(78,0) NOT NULL,
        s            NUMERIC(78,0) NOT NULL,
        UNIQUE (block_number, tx_index)
    )",
    "CREATE INDEX IF NOT EXISTS idx_chainmirror_transactions_from
     ON chainmirror_transactions(from_address)",
    "CREATE TABLE IF NOT EXISTS chainmirror_events (
        id        BIGSERIAL PRIMARY KEY,
        tx_id     BIGINT    NOT NULL REFERENCES chainmirror_transactions(id),
        log_index INTEGER   NOT NULL,
        topics    BYTEA[]   NOT NULL,
        data      BYTEA     NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_chainmirror_events_tx
     ON chainmirror_events(tx_id)",
    "CREATE TABLE IF NOT EXISTS chainmirror_filters (
        id             BIGSERIAL PRIMARY KEY,
        kind           TEXT      NOT NULL,
        params         JSONB,
        owner          TEXT      NOT NULL,
        created_at     BIGINT    NOT NULL,
        last_polled_at BIGINT    NOT NULL,
        initial_cursor BIGINT,
        cursor         BIGINT
    )",
];

const BLOCK_COLUMNS: &str = "number, hash, parent_hash, timestamp::TEXT AS timestamp,
    size::TEXT AS size, gas_limit::TEXT AS gas_limit, gas_used::TEXT AS gas_used,
    transactions_root, state_root, receipts_root";

const TX_SELECT: &str = "SELECT t.block_number, b.hash AS block_hash, t.tx_index, t.hash,
    t.from_address, t.to_address, t.nonce::TEXT AS nonce, t.value::TEXT AS value, t.input,
    t.v::TEXT AS v, t.r::TEXT AS r, t.s::TEXT AS s
    FROM chainmirror_transactions t
    JOIN chainmirror_blocks b ON b.number = t.block_number";

const LOG_SELECT: &str = "SELECT e.id, e.log_index, e.topics, e.data,
    t.hash AS tx_hash, t.tx_index, t.from_address, b.number, b.hash AS block_hash
    FROM chainmirror_events e
    JOIN chainmirror_transactions t ON t.id = e.tx_id
    JOIN chainmirror_blocks b ON b.number = t.block_number
    WHERE ";

fn db_err(e: sqlx::Error) -> MirrorError {
    MirrorError::Storage(e.to_string())
}

// ─── Row decoding ────────────────────────────────────────────────────────────

fn b256(bytes: &[u8]) -> Result<B256, MirrorError> {
    if bytes.len() != 32 {
        return Err(MirrorError::Codec(format!("expected 32-byte hash, got {} bytes", bytes.len())));
    }
    Ok(B256::from_slice(bytes))
}

fn address(bytes: &[u8]) -> Result<Address, MirrorError> {
    if bytes.len() != 20 {
        return Err(MirrorError::Codec(format!("expected 20-byte address, got {} bytes", bytes.len())));
    }
    Ok(Address::from_slice(bytes))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, MirrorError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(db_err)
}

fn get_u64_text(row: &PgRow, column: &str) -> Result<u64, MirrorError> {
    u64_from_decimal(&get::<String>(row, column)?)
}

fn block_from_row(row: &PgRow) -> Result<Block, MirrorError> {
    Ok(Block {
        number: from_i64(get(row, "number")?)?,
        hash: b256(&get::<Vec<u8>>(row, "hash")?)?,
        parent_hash: b256(&get::<Vec<u8>>(row, "parent_hash")?)?,
        timestamp: get_u64_text(row, "timestamp")?,
        size: get_u64_text(row, "size")?,
        gas_limit: get_u64_text(row, "gas_limit")?,
        gas_used: get_u64_text(row, "gas_used")?,
        transactions_root: b256(&get::<Vec<u8>>(row, "transactions_root")?)?,
        state_root: b256(&get::<Vec<u8>>(row, "state_root")?)?,
        receipts_root: b256(&get::<Vec<u8>>(row, "receipts_root")?)?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, MirrorError> {
    let to = get::<Option<Vec<u8>>>(row, "to_address")?
        .map(|bytes| address(&bytes))
        .transpose()?;
    Ok(Transaction {
        block_number: from_i64(get(row, "block_number")?)?,
        block_hash: b256(&get::<Vec<u8>>(row, "block_hash")?)?,
        tx_index: u32::try_from(get::<i32>(row, "tx_index")?)
            .map_err(|e| MirrorError::Codec(format!("tx_index: {e}")))?,
        data: TransactionData {
            hash: b256(&get::<Vec<u8>>(row, "hash")?)?,
            from: address(&get::<Vec<u8>>(row, "from_address")?)?,
            to,
            nonce: get_u64_text(row, "nonce")?,
            value: from_decimal(&get::<String>(row, "value")?)?,
            input: Bytes::from(get::<Vec<u8>>(row, "input")?),
            v: from_decimal(&get::<String>(row, "v")?)?,
            r: from_decimal(&get::<String>(row, "r")?)?,
            s: from_decimal(&get::<String>(row, "s")?)?,
        },
    })
}

fn log_from_row(row: &PgRow) -> Result<LogEntry, MirrorError> {
    let topics = get::<Vec<Vec<u8>>>(row, "topics")?
        .iter()
        .map(|t| b256(t))
        .collect::<Result<Vec<_>, _>>()?;
    let index = |column: &str| -> Result<u32, MirrorError> {
        u32::try_from(get::<i32>(row, column)?).map_err(|e| MirrorError::Codec(format!("{column}: {e}")))
    };
    Ok(LogEntry {
        event_id: from_i64(get(row, "id")?)?,
        block_number: from_i64(get(row, "number")?)?,
        block_hash: b256(&get::<Vec<u8>>(row, "block_hash")?)?,
        tx_hash: b256(&get::<Vec<u8>>(row, "tx_hash")?)?,
        tx_index: index("tx_index")?,
        log_index: index("log_index")?,
        address: address(&get::<Vec<u8>>(row, "from_address")?)?,
        topics,
        data: Bytes::from(get::<Vec<u8>>(row, "data")?),
    })
}

fn filter_from_row(row: &PgRow) -> Result<FilterRecord, MirrorError> {
    let kind: FilterKind = get::<String>(row, "kind")?.parse()?;
    let params = get::<Option<serde_json::Value>>(row, "params")?
        .map(|v| {
            serde_json::from_value::<LogFilterParams>(v)
                .map_err(|e| MirrorError::Codec(format!("stored filter params: {e}")))
        })
        .transpose()?;
    let cursor = |column: &str| -> Result<Option<u64>, MirrorError> {
        get::<Option<i64>>(row, column)?.map(from_i64).transpose()
    };
    Ok(FilterRecord {
        id: from_i64(get(row, "id")?)?,
        kind,
        params,
        owner: get(row, "owner")?,
        created_at: get(row, "created_at")?,
        last_polled_at: get(row, "last_polled_at")?,
        initial_cursor: cursor("initial_cursor")?,
        cursor: cursor("cursor")?,
    })
}

// ─── SQL rendering ───────────────────────────────────────────────────────────

/// Render a topic predicate against `e.topics` (1-based `BYTEA[]`). Missing
/// slots compare as NULL and therefore never match.
fn push_predicate(qb: &mut QueryBuilder<'_, Postgres>, predicate: &Predicate) {
    match predicate {
        Predicate::True => {
            qb.push("TRUE");
        }
        Predicate::False => {
            qb.push("FALSE");
        }
        Predicate::TopicEq { slot, topic } => {
            qb.push(format!("e.topics[{slot}] = "));
            qb.push_bind(topic.to_vec());
        }
        Predicate::And(parts) | Predicate::Or(parts) => {
            let joiner = if matches!(predicate, Predicate::And(_)) { " AND " } else { " OR " };
            qb.push("(");
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    qb.push(joiner);
                }
                push_predicate(qb, part);
            }
            qb.push(")");
        }
    }
}

fn build_log_query(query: &LogQuery) -> Result<QueryBuilder<'static, Postgres>, MirrorError> {
    let mut qb = QueryBuilder::new(LOG_SELECT);
    match &query.block {
        BlockPredicate::Range { from, to } => {
            qb.push("b.number BETWEEN ");
            qb.push_bind(to_i64(*from)?);
            qb.push(" AND ");
            qb.push_bind(to_i64(*to)?);
        }
        BlockPredicate::Hash(hash) => {
            qb.push("b.hash = ");
            qb.push_bind(hash.to_vec());
        }
    }
    if !query.addresses.is_empty() {
        let addresses: Vec<Vec<u8>> = query.addresses.iter().map(|a| a.to_vec()).collect();
        qb.push(" AND t.from_address = ANY(");
        qb.push_bind(addresses);
        qb.push(")");
    }
    if let Some(after) = query.after_event {
        qb.push(" AND e.id > ");
        qb.push_bind(to_i64(after)?);
    }
    if !query.topics.is_unconstrained() {
        qb.push(" AND ");
        push_predicate(&mut qb, &query.topics);
    }
    qb.push(" ORDER BY e.id");
    if let Some(limit) = query.limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    Ok(qb)
}

// ─── PostgresStore ───────────────────────────────────────────────────────────

/// PostgreSQL-backed [`Store`].
pub struct PostgresStore {
    pool: PgPool,
    notify: broadcast::Sender<u64>,
    listener: JoinHandle<()>,
}

impl PostgresStore {
    /// Connect with default pool settings and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, MirrorError> {
        Self::connect_with_options(database_url, &StoreConfig::default()).await
    }

    /// Connect with custom pool settings.
    pub async fn connect_with_options(
        database_url: &str,
        opts: &StoreConfig,
    ) -> Result<Self, MirrorError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| MirrorError::Storage(format!("postgres connect: {e}")))?;

        init_schema(&pool).await?;

        let (notify, _) = broadcast::channel(256);
        let mut listener = PgListener::connect_with(&pool)
            .await
            .map_err(|e| MirrorError::Storage(format!("postgres listen: {e}")))?;
        listener.listen(NEW_BLOCK_CHANNEL).await.map_err(db_err)?;
        let listener = tokio::spawn(forward_notifications(listener, notify.clone()));

        info!("PostgresStore connected and schema initialized");
        Ok(Self { pool, notify, listener })
    }

    /// Get the underlying connection pool (for custom queries).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Drop for PostgresStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn init_schema(pool: &PgPool) -> Result<(), MirrorError> {
    for stmt in SCHEMA {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .map_err(|e| MirrorError::Storage(format!("schema: {e}")))?;
    }
    debug!("PostgresStore schema initialized");
    Ok(())
}

/// Relay `NOTIFY` payloads into the in-process broadcast channel.
async fn forward_notifications(mut listener: PgListener, notify: broadcast::Sender<u64>) {
    loop {
        match listener.recv().await {
            Ok(notification) => match notification.payload().parse::<u64>() {
                Ok(number) => {
                    let _ = notify.send(number);
                }
                Err(_) => warn!(payload = notification.payload(), "ignoring malformed block notification"),
            },
            Err(e) => {
                // PgListener reconnects on the next recv
                warn!(error = %e, "block notification listener error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn latest_block_number(&self) -> Result<Option<u64>, MirrorError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(number) FROM chainmirror_blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        max.map(from_i64).transpose()
    }

    async fn latest_event_id(&self) -> Result<Option<u64>, MirrorError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM chainmirror_events")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        max.map(from_i64).transpose()
    }

    async fn insert_block(&self, bundle: &BlockBundle) -> Result<(), MirrorError> {
        let block = &bundle.block;
        let number = to_i64(block.number)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "INSERT INTO chainmirror_blocks
                (number, hash, parent_hash, timestamp, size, gas_limit, gas_used,
                 transactions_root, state_root, receipts_root)
             VALUES ($1, $2, $3, $4::NUMERIC, $5::NUMERIC, $6::NUMERIC, $7::NUMERIC, $8, $9, $10)",
        )
        .bind(number)
        .bind(block.hash.as_slice())
        .bind(block.parent_hash.as_slice())
        .bind(block.timestamp.to_string())
        .bind(block.size.to_string())
        .bind(block.gas_limit.to_string())
        .bind(block.gas_used.to_string())
        .bind(block.transactions_root.as_slice())
        .bind(block.state_root.as_slice())
        .bind(block.receipts_root.as_slice())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for itx in &bundle.transactions {
            let data = &itx.tx;
            let tx_id: i64 = sqlx::query_scalar(
                "INSERT INTO chainmirror_transactions
                    (block_number, tx_index, hash, from_address, to_address,
                     nonce, value, input, v, r, s)
                 VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7::NUMERIC, $8, $9::NUMERIC, $10::NUMERIC, $11::NUMERIC)
                 RETURNING id",
            )
            .bind(number)
            .bind(itx.tx_index as i32)
            .bind(data.hash.as_slice())
            .bind(data.from.as_slice())
            .bind(data.to.map(|a| a.to_vec()))
            .bind(data.nonce.to_string())
            .bind(to_decimal(data.value))
            .bind(data.input.to_vec())
            .bind(to_decimal(data.v))
            .bind(to_decimal(data.r))
            .bind(to_decimal(data.s))
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

            for ev in &itx.events {
                let topics: Vec<Vec<u8>> = ev.event.topics.iter().map(|t| t.to_vec()).collect();
                sqlx::query(
                    "INSERT INTO chainmirror_events (tx_id, log_index, topics, data)
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(tx_id)
                .bind(ev.log_index as i32)
                .bind(topics)
                .bind(ev.event.data.to_vec())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
        }

        // Delivered on commit only.
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NEW_BLOCK_CHANNEL)
            .bind(block.number.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit()
            .await
            .map_err(|e| MirrorError::Storage(format!("commit block {}: {e}", block.number)))?;

        debug!(block = block.number, txs = bundle.transactions.len(), "block committed");
        Ok(())
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, MirrorError> {
        let Ok(number) = i64::try_from(number) else {
            return Ok(None);
        };
        let row = sqlx::query(&format!("SELECT {BLOCK_COLUMNS} FROM chainmirror_blocks WHERE number = $1"))
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Option<Block>, MirrorError> {
        let row = sqlx::query(&format!("SELECT {BLOCK_COLUMNS} FROM chainmirror_blocks WHERE hash = $1"))
            .bind(hash.as_slice())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn transactions_in_block(&self, number: u64) -> Result<Vec<Transaction>, MirrorError> {
        let Ok(number) = i64::try_from(number) else {
            return Ok(vec![]);
        };
        let rows = sqlx::query(&format!("{TX_SELECT} WHERE t.block_number = $1 ORDER BY t.tx_index"))
            .bind(number)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn transaction_count(&self, number: u64) -> Result<Option<u64>, MirrorError> {
        let Ok(number) = i64::try_from(number) else {
            return Ok(None);
        };
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM chainmirror_blocks WHERE number = $1) AS present,
                    (SELECT COUNT(*) FROM chainmirror_transactions WHERE block_number = $1) AS n",
        )
        .bind(number)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        if !get::<bool>(&row, "present")? {
            return Ok(None);
        }
        from_i64(get(&row, "n")?).map(Some)
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<Transaction>, MirrorError> {
        let row = sqlx::query(&format!("{TX_SELECT} WHERE t.hash = $1"))
            .bind(hash.as_slice())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn transaction_by_location(
        &self,
        block_number: u64,
        tx_index: u32,
    ) -> Result<Option<Transaction>, MirrorError> {
        let (Ok(number), Ok(index)) = (i64::try_from(block_number), i32::try_from(tx_index)) else {
            return Ok(None);
        };
        let row = sqlx::query(&format!("{TX_SELECT} WHERE t.block_number = $1 AND t.tx_index = $2"))
            .bind(number)
            .bind(index)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn query_logs(&self, query: &LogQuery) -> Result<Vec<LogEntry>, MirrorError> {
        if query.topics == Predicate::False || query.limit == Some(0) {
            return Ok(vec![]);
        }
        let mut qb = build_log_query(query)?;
        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(log_from_row).collect()
    }

    async fn block_hashes_after(
        &self,
        after: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<(u64, B256)>, MirrorError> {
        let after = after.map(to_i64).transpose()?;
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query(
            "SELECT number, hash FROM chainmirror_blocks
             WHERE $1::BIGINT IS NULL OR number > $1
             ORDER BY number
             LIMIT $2",
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter()
            .map(|row| Ok((from_i64(get(row, "number")?)?, b256(&get::<Vec<u8>>(row, "hash")?)?)))
            .collect()
    }

    async fn create_filter(&self, filter: NewFilter) -> Result<u64, MirrorError> {
        let params = filter
            .params
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| MirrorError::Codec(format!("filter params: {e}")))?;
        let cursor = filter.cursor.map(to_i64).transpose()?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO chainmirror_filters
                 (kind, params, owner, created_at, last_polled_at, initial_cursor, cursor)
             VALUES ($1, $2, $3, $4, $4, $5, $5)
             RETURNING id",
        )
        .bind(filter.kind.as_str())
        .bind(params)
        .bind(&filter.owner)
        .bind(chrono::Utc::now().timestamp())
        .bind(cursor)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        debug!(id, kind = %filter.kind, "filter created");
        from_i64(id)
    }

    async fn get_filter(&self, id: u64) -> Result<Option<FilterRecord>, MirrorError> {
        let Ok(id) = i64::try_from(id) else {
            return Ok(None);
        };
        let row = sqlx::query(
            "SELECT id, kind, params, owner, created_at, last_polled_at, initial_cursor, cursor
             FROM chainmirror_filters WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(filter_from_row).transpose()
    }

    async fn advance_filter(
        &self,
        id: u64,
        expected: Option<u64>,
        next: u64,
    ) -> Result<bool, MirrorError> {
        let Ok(id) = i64::try_from(id) else {
            return Ok(false);
        };
        let expected = expected.map(to_i64).transpose()?;
        let result = sqlx::query(
            "UPDATE chainmirror_filters SET cursor = $3
             WHERE id = $1
               AND cursor IS NOT DISTINCT FROM $2
               AND ($2::BIGINT IS NULL OR $3 > $2)",
        )
        .bind(id)
        .bind(expected)
        .bind(to_i64(next)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_filter(&self, id: u64) -> Result<bool, MirrorError> {
        let Ok(id) = i64::try_from(id) else {
            return Ok(false);
        };
        let result = sqlx::query("DELETE FROM chainmirror_filters WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_filter(&self, id: u64, at: i64) -> Result<bool, MirrorError> {
        let Ok(id) = i64::try_from(id) else {
            return Ok(false);
        };
        let result = sqlx::query("UPDATE chainmirror_filters SET last_polled_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_filters(&self, cutoff: i64) -> Result<Vec<u64>, MirrorError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "DELETE FROM chainmirror_filters WHERE last_polled_at <= $1 RETURNING id",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        let mut ids = ids.into_iter().map(from_i64).collect::<Result<Vec<_>, _>>()?;
        ids.sort_unstable();
        Ok(ids)
    }

    fn subscribe_blocks(&self) -> broadcast::Receiver<u64> {
        self.notify.subscribe()
    }
}
