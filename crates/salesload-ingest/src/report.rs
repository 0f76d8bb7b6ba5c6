//! Per-task results and the run report

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::error::{FailureKind, LoadError};
use crate::types::TaskId;

/// Outcome of one load task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded { rows_affected: u64 },
    Failed { kind: FailureKind, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub task: TaskId,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub outcome: TaskOutcome,
}

impl LoadResult {
    pub fn succeeded(task: TaskId, elapsed: Duration, rows_affected: u64) -> Self {
        Self {
            task,
            elapsed,
            outcome: TaskOutcome::Succeeded { rows_affected },
        }
    }

    pub fn failed(task: TaskId, elapsed: Duration, error: &LoadError) -> Self {
        Self {
            task,
            elapsed,
            outcome: TaskOutcome::Failed {
                kind: error.kind(),
                detail: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Succeeded { .. })
    }

    pub fn rows_affected(&self) -> Option<u64> {
        match self.outcome {
            TaskOutcome::Succeeded { rows_affected } => Some(rows_affected),
            TaskOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.outcome {
            TaskOutcome::Succeeded { .. } => None,
            TaskOutcome::Failed { kind, .. } => Some(kind),
        }
    }

    /// Never ran because an earlier stage aborted
    pub fn is_skipped(&self) -> bool {
        self.failure_kind() == Some(FailureKind::DependencyAbort)
    }
}

/// How the run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Aborted { stage: usize, stage_name: String },
}

/// Per-table rollup of task results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub table: String,
    pub stage: usize,
    pub chunks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rows_affected: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub tables: Vec<TableSummary>,
    pub results: Vec<LoadResult>,
}

impl LoadReport {
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        outcome: RunOutcome,
        results: Vec<LoadResult>,
    ) -> Self {
        let tables = summarize_tables(&results);
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcome,
            tables,
            results,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed && self.results.iter().all(LoadResult::is_success)
    }

    pub fn total_rows_affected(&self) -> u64 {
        self.results.iter().filter_map(LoadResult::rows_affected).sum()
    }

    pub fn table(&self, name: &str) -> Option<&TableSummary> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Results that failed for a reason other than an earlier abort
    pub fn failures(&self) -> impl Iterator<Item = &LoadResult> {
        self.results
            .iter()
            .filter(|r| !r.is_success() && !r.is_skipped())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary for the end of a run
    pub fn summarize(&self) -> String {
        let total = self.results.len();
        let succeeded = self.results.iter().filter(|r| r.is_success()).count();
        let skipped = self.results.iter().filter(|r| r.is_skipped()).count();
        let failed = total - succeeded - skipped;

        let outcome = match &self.outcome {
            RunOutcome::Completed => "completed".to_string(),
            RunOutcome::Aborted { stage, stage_name } => {
                format!("aborted in stage {} ({})", stage, stage_name)
            }
        };

        let mut summary = format!(
            "Load Summary ({}):\n\
             - Run: {}\n\
             - Tasks: {}\n\
             - Succeeded: {}\n\
             - Failed: {}\n\
             - Skipped (dependency abort): {}\n\
             - Rows inserted: {}",
            outcome,
            self.run_id,
            total,
            succeeded,
            failed,
            skipped,
            self.total_rows_affected()
        );

        for t in &self.tables {
            summary.push_str(&format!(
                "\n  {:<16} stage {} chunks {:>3}  ok {:>3}  failed {:>3}  skipped {:>3}  rows {:>9}  {} ms",
                t.table, t.stage, t.chunks, t.succeeded, t.failed, t.skipped, t.rows_affected, t.elapsed_ms
            ));
        }

        for failure in self.failures() {
            if let TaskOutcome::Failed { kind, detail } = &failure.outcome {
                summary.push_str(&format!("\n  ! {} {}: {}", failure.task, kind, detail));
            }
        }

        summary
    }
}

/// Roll results up per table, ordered by stage then first appearance
fn summarize_tables(results: &[LoadResult]) -> Vec<TableSummary> {
    let mut tables: Vec<TableSummary> = Vec::new();

    for result in results {
        let index = match tables.iter().position(|t| t.table == result.task.table) {
            Some(index) => index,
            None => {
                tables.push(TableSummary {
                    table: result.task.table.clone(),
                    stage: result.task.stage,
                    ..Default::default()
                });
                tables.len() - 1
            }
        };

        let summary = &mut tables[index];
        summary.chunks += 1;
        summary.elapsed_ms += result.elapsed.as_millis() as u64;
        match &result.outcome {
            TaskOutcome::Succeeded { rows_affected } => {
                summary.succeeded += 1;
                summary.rows_affected += rows_affected;
            }
            TaskOutcome::Failed { kind, .. } if *kind == FailureKind::DependencyAbort => {
                summary.skipped += 1
            }
            TaskOutcome::Failed { .. } => summary.failed += 1,
        }
    }

    tables.sort_by_key(|t| t.stage);
    tables
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn id(stage: usize, table: &str, chunk: usize, chunks: usize) -> TaskId {
        TaskId {
            stage,
            table: table.to_string(),
            chunk,
            chunks,
        }
    }

    fn aborted_report() -> LoadReport {
        let results = vec![
            LoadResult::succeeded(id(0, "supply_center", 0, 1), Duration::from_millis(12), 2),
            LoadResult::failed(
                id(0, "product", 0, 1),
                Duration::from_millis(5),
                &LoadError::Merge {
                    table: "product".to_string(),
                    detail: "deadlock detected".to_string(),
                },
            ),
            LoadResult::failed(id(1, "client", 0, 1), Duration::ZERO, &LoadError::dependency_abort("base")),
        ];
        LoadReport::new(
            Uuid::new_v4(),
            Utc::now(),
            RunOutcome::Aborted {
                stage: 0,
                stage_name: "base".to_string(),
            },
            results,
        )
    }

    #[test]
    fn test_report_distinguishes_success_failure_and_skip() {
        let report = aborted_report();
        assert!(!report.is_success());
        assert_eq!(report.total_rows_affected(), 2);
        assert_eq!(report.failures().count(), 1);

        let client = report.table("client").unwrap();
        assert_eq!((client.skipped, client.failed), (1, 0));
        let product = report.table("product").unwrap();
        assert_eq!((product.failed, product.succeeded), (1, 0));
    }

    #[test]
    fn test_summarize_mentions_abort_and_failure() {
        let summary = aborted_report().summarize();
        assert!(summary.contains("aborted in stage 0 (base)"));
        assert!(summary.contains("Skipped (dependency abort): 1"));
        assert!(summary.contains("product[1/1] merge_failure"));
    }

    #[test]
    fn test_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&aborted_report().to_json().unwrap()).unwrap();
        assert_eq!(json["outcome"]["state"], "aborted");
        assert_eq!(json["results"][0]["outcome"]["status"], "succeeded");
        assert_eq!(json["results"][0]["elapsed_ms"], 12);
        assert_eq!(json["results"][1]["outcome"]["kind"], "merge_failure");
        assert_eq!(json["tables"][0]["table"], "supply_center");
    }

    #[test]
    fn test_tables_sorted_by_stage() {
        let results = vec![
            LoadResult::succeeded(id(2, "contract", 0, 1), Duration::ZERO, 1),
            LoadResult::succeeded(id(0, "product", 0, 2), Duration::ZERO, 1),
            LoadResult::succeeded(id(0, "product", 1, 2), Duration::ZERO, 3),
        ];
        let tables = summarize_tables(&results);
        assert_eq!(tables[0].table, "product");
        assert_eq!(tables[0].chunks, 2);
        assert_eq!(tables[0].rows_affected, 4);
        assert_eq!(tables[1].table, "contract");
    }
}
