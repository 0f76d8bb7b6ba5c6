//! Conflict-safe stage-then-merge load of one chunk
//!
//! Every chunk goes through the same steps on one connection:
//! validate, begin, create staging, bulk copy, merge, commit. Nothing becomes
//! visible unless the commit succeeds, so a chunk either lands as a whole or
//! not at all, and re-running it only inserts keys that are still missing.

use std::time::Instant;

use tracing::{debug, warn};

use crate::backend::{LoadConnection, StagingScope};
use crate::error::LoadError;
use crate::types::{Row, TableDescriptor};

/// Load `rows` into `table` on `conn`; returns rows actually inserted.
///
/// Row shape is checked before any I/O. Faults while opening the transaction,
/// creating staging or copying are [`LoadError::Staging`]; faults while
/// merging or committing are [`LoadError::Merge`]. Either way the transaction
/// is rolled back.
#[tracing::instrument(skip(conn, table, rows), fields(table = table.name(), rows = rows.len()))]
pub async fn load<C>(conn: &mut C, table: &TableDescriptor, rows: &[Row]) -> Result<u64, LoadError>
where
    C: LoadConnection + ?Sized,
{
    table.check_rows(rows)?;
    if rows.is_empty() {
        debug!("No rows to load");
        return Ok(0);
    }

    let start = Instant::now();
    let name = table.name();

    let mut scope = conn
        .begin()
        .await
        .map_err(|e| LoadError::staging(name, e))?;

    let staging = match stage(scope.as_mut(), table, rows).await {
        Ok(staging) => staging,
        Err(e) => {
            rollback_quietly(scope, name).await;
            return Err(LoadError::staging(name, e));
        }
    };

    let inserted = match scope.merge(&staging, table).await {
        Ok(inserted) => inserted,
        Err(e) => {
            rollback_quietly(scope, name).await;
            return Err(LoadError::merge(name, e));
        }
    };

    scope.commit().await.map_err(|e| LoadError::merge(name, e))?;

    debug!(
        rows_affected = inserted,
        skipped = rows.len() as u64 - inserted.min(rows.len() as u64),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Chunk merged"
    );

    Ok(inserted)
}

async fn stage(
    scope: &mut (dyn StagingScope + '_),
    table: &TableDescriptor,
    rows: &[Row],
) -> anyhow::Result<String> {
    let staging = scope.create_staging(table).await?;
    let copied = scope.bulk_copy(&staging, table, rows).await?;
    debug!(staging = %staging, copied, "Rows staged");
    Ok(staging)
}

async fn rollback_quietly(scope: Box<dyn StagingScope + '_>, table: &str) {
    if let Err(e) = scope.rollback().await {
        warn!(table, error = %format!("{:#}", e), "Rollback failed");
    }
}
