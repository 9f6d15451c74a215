//! PostgreSQL destination
//!
//! Layout, inside a configurable schema:
//!
//! - `data_json`: one row per `(source, id_data)`, the mapped record in `item`
//! - `increment_log`: the watermark of each source
//! - `download_log`: one line per committed page

use super::{dedupe_rows, Batch, Committed, Destination};
use crate::config::validate_identifier;
use crate::error::WriteError;
use crate::retry::RetryPolicy;
use crate::types::{Cursor, Watermark};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

/// Rows per INSERT statement; 7 binds each stays far below the 65535 limit
const UPSERT_CHUNK_ROWS: usize = 1000;

/// SQL text, rendered once for the configured schema
#[derive(Debug, Clone)]
struct Statements {
    ddl: Vec<String>,
    upsert_prefix: String,
    upsert_suffix: String,
    advance_watermark: String,
    append_log: String,
    load_watermark: String,
    list_watermarks: String,
}

impl Statements {
    fn for_schema(schema: &str) -> Self {
        let ddl = vec![
            format!("CREATE SCHEMA IF NOT EXISTS {schema}"),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {schema}.data_json (
                    source      VARCHAR(100) NOT NULL,
                    id_data     TEXT NOT NULL,
                    uuid        UUID,
                    item        JSONB NOT NULL,
                    update_ts   TIMESTAMPTZ,
                    export_id   INTEGER NOT NULL,
                    synced_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
                    PRIMARY KEY (source, id_data)
                )
                "#
            ),
            format!("CREATE INDEX IF NOT EXISTS data_json_uuid_idx ON {schema}.data_json (uuid)"),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {schema}.increment_log (
                    source      VARCHAR(100) PRIMARY KEY,
                    position    BIGINT NOT NULL CHECK (position >= 0),
                    last_ts     TIMESTAMPTZ NOT NULL DEFAULT now()
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {schema}.download_log (
                    id            BIGSERIAL PRIMARY KEY,
                    source        VARCHAR(100) NOT NULL,
                    export_id     INTEGER NOT NULL,
                    position      BIGINT NOT NULL,
                    rows_written  INTEGER NOT NULL,
                    rows_skipped  INTEGER NOT NULL,
                    download_ts   TIMESTAMPTZ NOT NULL DEFAULT now()
                )
                "#
            ),
        ];

        Self {
            ddl,
            upsert_prefix: format!(
                "INSERT INTO {schema}.data_json (source, id_data, uuid, item, update_ts, export_id, synced_at) "
            ),
            // A replayed identical row is left untouched, synced_at included
            upsert_suffix: format!(
                r#"
                ON CONFLICT (source, id_data) DO UPDATE SET
                    uuid = EXCLUDED.uuid,
                    item = EXCLUDED.item,
                    update_ts = EXCLUDED.update_ts,
                    export_id = EXCLUDED.export_id,
                    synced_at = EXCLUDED.synced_at
                WHERE {schema}.data_json.uuid IS DISTINCT FROM EXCLUDED.uuid
                   OR {schema}.data_json.item IS DISTINCT FROM EXCLUDED.item
                   OR {schema}.data_json.update_ts IS DISTINCT FROM EXCLUDED.update_ts
                   OR {schema}.data_json.export_id IS DISTINCT FROM EXCLUDED.export_id
                "#
            ),
            advance_watermark: format!(
                r#"
                INSERT INTO {schema}.increment_log (source, position, last_ts)
                VALUES ($1, $2, now())
                ON CONFLICT (source) DO UPDATE SET
                    position = GREATEST({schema}.increment_log.position, EXCLUDED.position),
                    last_ts = now()
                RETURNING position
                "#
            ),
            append_log: format!(
                r#"
                INSERT INTO {schema}.download_log
                    (source, export_id, position, rows_written, rows_skipped)
                VALUES ($1, $2, $3, $4, $5)
                "#
            ),
            load_watermark: format!(
                "SELECT source, position, last_ts FROM {schema}.increment_log WHERE source = $1"
            ),
            list_watermarks: format!(
                "SELECT source, position, last_ts FROM {schema}.increment_log ORDER BY source"
            ),
        }
    }
}

fn to_watermark((source, position, last_ts): (String, i64, DateTime<Utc>)) -> Result<Watermark, WriteError> {
    let position = u64::try_from(position)
        .map_err(|_| WriteError::Invalid(format!("negative watermark {position} for '{source}'")))?;
    Ok(Watermark {
        source,
        cursor: Cursor::new(position),
        updated_at: last_ts,
    })
}

fn to_i32(value: usize, what: &str) -> Result<i32, WriteError> {
    i32::try_from(value).map_err(|_| WriteError::Invalid(format!("{what} {value} out of range")))
}

#[derive(Debug, Clone)]
pub struct PgDestination {
    pool: PgPool,
    schema: String,
    retry: RetryPolicy,
    sql: Statements,
}

impl PgDestination {
    pub fn new(pool: PgPool, schema: &str, retry: RetryPolicy) -> gn2gn_common::Result<Self> {
        validate_identifier(schema)?;
        Ok(Self {
            pool,
            schema: schema.to_string(),
            retry,
            sql: Statements::for_schema(schema),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Create the schema and tables if missing. Safe to run repeatedly.
    pub async fn ensure_schema(&self) -> Result<(), WriteError> {
        let mut tx = self.pool.begin().await?;
        for statement in &self.sql.ddl {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!(schema = %self.schema, "Destination schema ready");
        Ok(())
    }

    async fn try_write(&self, batch: &Batch) -> Result<Committed, WriteError> {
        let rows = dedupe_rows(batch)?;
        let position = i64::try_from(batch.watermark.position())
            .map_err(|_| WriteError::Invalid(format!("watermark {} out of range", batch.watermark)))?;
        let export_id = i32::try_from(batch.export_id)
            .map_err(|_| WriteError::Invalid(format!("export id {} out of range", batch.export_id)))?;

        let mut tx = self.pool.begin().await?;

        for chunk in rows.chunks(UPSERT_CHUNK_ROWS) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new(&self.sql.upsert_prefix);
            query_builder.push_values(chunk.iter(), |mut b, row| {
                b.push_bind(&row.source)
                    .push_bind(&row.natural_key)
                    .push_bind(row.uuid)
                    .push_bind(Json(&row.item))
                    .push_bind(row.updated_at)
                    .push_bind(export_id)
                    .push("now()");
            });
            query_builder.push(&self.sql.upsert_suffix);
            query_builder.build().execute(&mut *tx).await?;
        }

        let stored: i64 = sqlx::query_scalar(&self.sql.advance_watermark)
            .bind(&batch.source)
            .bind(position)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(&self.sql.append_log)
            .bind(&batch.source)
            .bind(export_id)
            .bind(stored)
            .bind(to_i32(rows.len(), "row count")?)
            .bind(to_i32(batch.skipped, "skip count")?)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let watermark = to_watermark((batch.source.clone(), stored, Utc::now()))?.cursor;
        debug!(
            source = %batch.source,
            rows = rows.len(),
            skipped = batch.skipped,
            watermark = %watermark,
            "Batch committed"
        );

        Ok(Committed {
            rows_written: rows.len(),
            watermark,
        })
    }
}

#[async_trait]
impl Destination for PgDestination {
    async fn load_watermark(&self, source: &str) -> Result<Option<Watermark>, WriteError> {
        let row = self
            .retry
            .run("load_watermark", |_| async {
                sqlx::query_as::<_, (String, i64, DateTime<Utc>)>(&self.sql.load_watermark)
                    .bind(source)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(WriteError::from)
            })
            .await?;

        row.map(to_watermark).transpose()
    }

    async fn watermarks(&self) -> Result<Vec<Watermark>, WriteError> {
        let rows: Vec<(String, i64, DateTime<Utc>)> = sqlx::query_as(&self.sql.list_watermarks)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(to_watermark).collect()
    }

    async fn write_batch(&self, batch: &Batch) -> Result<Committed, WriteError> {
        self.retry.run("write_batch", |_| self.try_write(batch)).await
    }
}
