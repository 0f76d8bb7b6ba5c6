//! MySQL adapter
//!
//! MySQL has neither `ON COMMIT DROP` nor a COPY protocol reachable from
//! sqlx, so staging is a `TEMPORARY` table created per task and filled with
//! multi-row `INSERT` statements. The merge is an anti-join against the
//! target on the conflict key.
//!
//! Transactions run at `READ COMMITTED`, so the anti-join is a plain
//! consistent read and takes no gap locks. A key committed by another
//! session between that read and the insert is absorbed by a no-op
//! `ON DUPLICATE KEY UPDATE`. sqlx connects with `CLIENT_FOUND_ROWS`, so
//! such a row is still counted as affected.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql, QueryBuilder, Transaction};
use tracing::debug;

use super::{column_list, quote_ident, quote_table, staging_name, LoadConnection, StagingScope};
use crate::types::{Row, TableDescriptor, Value};

const QUOTE: char = '`';

/// Bind parameters allowed in one prepared statement
const MAX_PLACEHOLDERS: usize = 65_535;

pub struct MySqlStagingScope<'c> {
    tx: Transaction<'c, MySql>,
    staging: Option<String>,
}

#[async_trait]
impl LoadConnection for PoolConnection<MySql> {
    async fn begin<'c>(&'c mut self) -> Result<Box<dyn StagingScope + 'c>> {
        // Applies to the next transaction on this session only
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut **self)
            .await
            .context("Failed to set transaction isolation level")?;

        let tx = Connection::begin(&mut **self)
            .await
            .context("Failed to begin transaction")?;
        Ok(Box::new(MySqlStagingScope { tx, staging: None }))
    }
}

#[async_trait]
impl StagingScope for MySqlStagingScope<'_> {
    async fn create_staging(&mut self, table: &TableDescriptor) -> Result<String> {
        let staging = staging_name(table);
        let quoted = quote_ident(&staging, QUOTE);

        // A rolled-back task on this pooled session may have left one behind
        sqlx::query(&format!("DROP TEMPORARY TABLE IF EXISTS {}", quoted))
            .execute(&mut *self.tx)
            .await
            .context("Failed to drop stale staging table")?;

        let sql = format!(
            "CREATE TEMPORARY TABLE {} AS SELECT {} FROM {} LIMIT 0",
            quoted,
            column_list(table, QUOTE),
            quote_table(table.name(), QUOTE)
        );
        sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .with_context(|| format!("Failed to create staging table for {}", table.name()))?;

        self.staging = Some(staging.clone());
        Ok(staging)
    }

    async fn bulk_copy(&mut self, staging: &str, table: &TableDescriptor, rows: &[Row]) -> Result<u64> {
        // The anti-join only looks at the target, so a repeated key inside
        // staging would be inserted twice
        let rows = table.first_per_key(rows);
        let per_statement = rows_per_statement(table.arity());
        let prefix = format!(
            "INSERT INTO {} ({}) ",
            quote_ident(staging, QUOTE),
            column_list(table, QUOTE)
        );

        let mut copied = 0u64;
        for batch in rows.chunks(per_statement) {
            let mut builder: QueryBuilder<MySql> = QueryBuilder::new(&prefix);
            builder.push_values(batch, |mut b, row| {
                for value in row.values() {
                    match value {
                        Value::Null => b.push_bind(None::<String>),
                        Value::Text(s) => b.push_bind(s.clone()),
                        Value::Integer(i) => b.push_bind(*i),
                        Value::Decimal(d) => b.push_bind(d.clone()),
                        Value::Date(d) => b.push_bind(*d),
                    };
                }
            });

            let result = builder
                .build()
                .execute(&mut *self.tx)
                .await
                .context("Failed to insert rows into staging")?;
            copied += result.rows_affected();
        }

        debug!(table = table.name(), rows = copied, "Staged rows");
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

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if let Some(staging) = self.staging.take() {
            sqlx::query(&format!(
                "DROP TEMPORARY TABLE IF EXISTS {}",
                quote_ident(&staging, QUOTE)
            ))
            .execute(&mut *self.tx)
            .await
            .context("Failed to drop staging table")?;
        }
        self.tx.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.context("Failed to roll back transaction")
    }
}

/// Rows that fit in one statement for a table of `arity` columns
fn rows_per_statement(arity: usize) -> usize {
    (MAX_PLACEHOLDERS / arity.max(1)).max(1)
}

pub(crate) fn merge_statement(staging: &str, table: &TableDescriptor) -> String {
    let target = quote_table(table.name(), QUOTE);
    let selected = table
        .column_names()
        .map(|c| format!("s.{}", quote_ident(c, QUOTE)))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} AS s",
        target,
        column_list(table, QUOTE),
        selected,
        quote_ident(staging, QUOTE)
    );

    if let Some(key) = table.conflict_key() {
        let matches = key
            .iter()
            .map(|k| {
                let k = quote_ident(k, QUOTE);
                format!("d.{} = s.{}", k, k)
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        sql.push_str(&format!(
            " WHERE NOT EXISTS (SELECT 1 FROM {} AS d WHERE {})",
            target, matches
        ));

        if let Some(first) = key.first() {
            let first = quote_ident(first, QUOTE);
            sql.push_str(&format!(
                " ON DUPLICATE KEY UPDATE {}.{} = {}.{}",
                target, first, target, first
            ));
        }
    }

    sql
}
