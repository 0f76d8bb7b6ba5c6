//! PostgreSQL adapter
//!
//! Staging is a `TEMP ... ON COMMIT DROP` table, so it lives exactly as long
//! as the task's transaction and is invisible to other sessions. Rows reach
//! it through one `COPY ... FROM STDIN` stream; the merge is a single
//! `INSERT ... SELECT` with `ON CONFLICT (key) DO NOTHING` for keyed tables.
//!
//! In CSV COPY only an unquoted empty field reads as NULL. Every non-null
//! value is written quoted, so empty strings and text such as `\N` survive.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Postgres, Transaction};
use tracing::debug;

use super::{column_list, quote_ident, quote_table, staging_name, LoadConnection, StagingScope};
use crate::types::{Row, TableDescriptor};

const QUOTE: char = '"';

pub struct PgStagingScope<'c> {
    tx: Transaction<'c, Postgres>,
}

#[async_trait]
impl LoadConnection for PoolConnection<Postgres> {
    async fn begin<'c>(&'c mut self) -> Result<Box<dyn StagingScope + 'c>> {
        let tx = Connection::begin(&mut **self)
            .await
            .context("Failed to begin transaction")?;
        Ok(Box::new(PgStagingScope { tx }))
    }
}

#[async_trait]
impl StagingScope for PgStagingScope<'_> {
    async fn create_staging(&mut self, table: &TableDescriptor) -> Result<String> {
        let staging = staging_name(table);
        let sql = format!(
            "CREATE TEMP TABLE {} ON COMMIT DROP AS SELECT {} FROM {} WITH NO DATA",
            quote_ident(&staging, QUOTE),
            column_list(table, QUOTE),
            quote_table(table.name(), QUOTE)
        );

        sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to create staging table for {}", table.name()))?;

        Ok(staging)
    }

    async fn bulk_copy(&mut self, staging: &str, table: &TableDescriptor, rows: &[Row]) -> Result<u64> {
        let payload = encode_copy_csv(rows);
        let statement = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv)",
            quote_ident(staging, QUOTE),
            column_list(table, QUOTE)
        );

        debug!(table = table.name(), bytes = payload.len(), rows = rows.len(), "Starting COPY");

        let mut copy = self
            .tx
            .copy_in_raw(&statement)
            .await
            .context("Failed to start COPY into staging")?;

        let sent = copy.send(payload).await.map(|_| ());
        if let Err(e) = sent {
            // Leave the connection in a usable state before reporting
            let _ = copy.abort(e.to_string()).await;
            return Err(e).context("Failed to stream rows into staging");
        }

        let copied = copy.finish().await.context("COPY into staging did not complete")?;
        if copied != rows.len() as u64 {
            anyhow::bail!("COPY loaded {} rows into staging, expected {}", copied, rows.len());
        }

        Ok(copied)
    }

    async fn merge(&mut self, staging: &str, table: &TableDescriptor) -> Result<u64> {
        let sql = merge_statement(staging, table);

        let result = sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to merge staging into {}", table.name()))?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.context("Failed to roll back transaction")
    }
}

/// `INSERT ... SELECT` from staging, with a do-nothing conflict clause for
/// keyed tables
pub(crate) fn merge_statement(staging: &str, table: &TableDescriptor) -> String {
    let columns = column_list(table, QUOTE);
    let mut sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        quote_table(table.name(), QUOTE),
        columns,
        columns,
        quote_ident(staging, QUOTE)
    );

    if let Some(key) = table.conflict_key() {
        let key = key
            .iter()
            .map(|k| quote_ident(k, QUOTE))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", key));
    }

    sql
}

/// Encode rows as the CSV body of a `COPY ... WITH (FORMAT csv)` stream.
///
/// NULL is an empty unquoted field; every other value is quoted with inner
/// quotes doubled. `csv::QuoteStyle` applies one style to all fields, which
/// cannot express that split.
pub(crate) fn encode_copy_csv(rows: &[Row]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(rows.len() * 64);

    for row in rows {
        for (i, value) in row.values().iter().enumerate() {
            if i > 0 {
                buf.push(b',');
            }
            if let Some(text) = value.as_text() {
                buf.push(b'"');
                for byte in text.bytes() {
                    if byte == b'"' {
                        buf.push(b'"');
                    }
                    buf.push(byte);
                }
                buf.push(b'"');
            }
        }
        buf.push(b'\n');
    }

    buf
}
