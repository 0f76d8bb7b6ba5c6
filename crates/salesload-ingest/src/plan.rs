//! Turns record batches into ordered, chunked stages

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::chunker;
use crate::error::LoadError;
use crate::types::{LoadTask, RecordBatch, Row, Stage, TaskId};

/// One named stage of the layout and the tables it loads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub name: String,
    pub tables: Vec<String>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, tables: &[&str]) -> Self {
        Self {
            name: name.into(),
            tables: tables.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Ordered stage layout: tables of a stage depend only on earlier stages
#[derive(Debug, Clone)]
pub struct LoadPlan {
    stages: Vec<StageSpec>,
}

impl LoadPlan {
    /// Create a plan, rejecting layouts that name a table twice
    pub fn new(stages: Vec<StageSpec>) -> Result<Self, LoadError> {
        let mut seen = HashSet::new();
        for stage in &stages {
            if stage.name.trim().is_empty() {
                return Err(LoadError::config("stage name cannot be empty"));
            }
            for table in &stage.tables {
                if !seen.insert(table.as_str()) {
                    return Err(LoadError::config(format!(
                        "table '{}' appears more than once in the stage layout",
                        table
                    )));
                }
            }
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Chunk every batch and group the tasks by stage.
    ///
    /// Each batch must be named by the layout and appear once. Layout tables
    /// without a batch are skipped. Keyed tables keep the first row for each
    /// key, so concurrent chunks never race on one key.
    pub fn build(&self, batches: Vec<RecordBatch>, chunk_size: NonZeroUsize) -> Result<Vec<Stage>, LoadError> {
        let mut by_table: HashMap<String, RecordBatch> = HashMap::with_capacity(batches.len());
        for batch in batches {
            let name = batch.table().to_string();
            if !self.stages.iter().any(|s| s.tables.contains(&name)) {
                return Err(LoadError::config(format!(
                    "batch '{}' is not part of any stage",
                    name
                )));
            }
            if by_table.insert(name.clone(), batch).is_some() {
                return Err(LoadError::config(format!("duplicate batch for table '{}'", name)));
            }
        }

        let mut stages = Vec::with_capacity(self.stages.len());
        for (index, spec) in self.stages.iter().enumerate() {
            let mut tasks = Vec::new();
            for table in &spec.tables {
                let Some(batch) = by_table.remove(table) else {
                    warn!(table = %table, stage = %spec.name, "No batch for table; skipping");
                    continue;
                };

                // Two chunks of one stage must not carry the same key
                let rows: Vec<Row> = batch.descriptor.first_per_key(&batch.rows).into_iter().cloned().collect();
                if rows.len() < batch.rows.len() {
                    debug!(
                        table = %table,
                        dropped = batch.rows.len() - rows.len(),
                        "Dropped rows repeating a conflict key"
                    );
                }

                let descriptor = Arc::new(batch.descriptor);
                let chunks = chunker::split(rows, chunk_size);
                let count = chunks.len();
                debug!(table = %table, stage = %spec.name, chunks = count, "Planned table");

                tasks.extend(chunks.into_iter().enumerate().map(|(chunk, rows)| LoadTask {
                    id: TaskId {
                        stage: index,
                        table: table.clone(),
                        chunk,
                        chunks: count,
                    },
                    descriptor: descriptor.clone(),
                    rows,
                }));
            }
            stages.push(Stage::new(spec.name.clone(), tasks));
        }

        Ok(stages)
    }
}
