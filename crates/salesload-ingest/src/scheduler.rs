//! Ordered stage execution
//!
//! A stage is handed to the [`WorkerPool`] only after every task of the
//! previous stage succeeded. The first stage with a failed task aborts the
//! run; tasks of later stages are never submitted and are reported as
//! [`FailureKind::DependencyAbort`](crate::error::FailureKind).

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::backend::ConnectionProvider;
use crate::error::LoadError;
use crate::pool::WorkerPool;
use crate::report::{LoadReport, LoadResult, RunOutcome};
use crate::types::Stage;

/// Scheduler position within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Pending,
    Running(usize),
    Advancing(usize),
    Aborted(usize),
    Completed,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Pending => write!(f, "pending"),
            SchedulerState::Running(i) => write!(f, "running({})", i),
            SchedulerState::Advancing(i) => write!(f, "advancing({})", i),
            SchedulerState::Aborted(i) => write!(f, "aborted({})", i),
            SchedulerState::Completed => write!(f, "completed"),
        }
    }
}

pub struct StageScheduler<P> {
    pool: WorkerPool<P>,
    state: SchedulerState,
}

impl<P: ConnectionProvider> StageScheduler<P> {
    pub fn new(pool: WorkerPool<P>) -> Self {
        Self {
            pool,
            state: SchedulerState::Pending,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    fn transition(&mut self, next: SchedulerState) {
        info!(from = %self.state, to = %next, "Scheduler state change");
        self.state = next;
    }

    /// Run `stages` in order and report every task's outcome
    pub async fn run(&mut self, stages: Vec<Stage>) -> LoadReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let stage_count = stages.len();
        let mut results: Vec<LoadResult> = Vec::new();
        let mut aborted: Option<(usize, String)> = None;

        info!(%run_id, stages = stage_count, "Starting load run");
        self.state = SchedulerState::Pending;

        for (index, stage) in stages.into_iter().enumerate() {
            if let Some((_, ref aborted_name)) = aborted {
                let skip = LoadError::dependency_abort(aborted_name.clone());
                results.extend(
                    stage
                        .tasks
                        .into_iter()
                        .map(|task| LoadResult::failed(task.id, Duration::ZERO, &skip)),
                );
                continue;
            }

            if index > 0 {
                self.transition(SchedulerState::Advancing(index));
            }
            self.transition(SchedulerState::Running(index));

            let tables = stage.tables().join(", ");
            info!(
                stage = %stage.name,
                index,
                tasks = stage.tasks.len(),
                tables = %tables,
                "Submitting stage"
            );

            let stage_results = self.pool.run(stage.tasks).await;
            let failed = stage_results.iter().filter(|r| !r.is_success()).count();
            results.extend(stage_results);

            if failed > 0 {
                error!(stage = %stage.name, index, failed, "Stage failed; aborting run");
                self.transition(SchedulerState::Aborted(index));
                aborted = Some((index, stage.name));
            } else {
                info!(stage = %stage.name, index, "Stage complete");
            }
        }

        let outcome = match aborted {
            Some((stage, stage_name)) => RunOutcome::Aborted { stage, stage_name },
            None => {
                self.transition(SchedulerState::Completed);
                RunOutcome::Completed
            }
        };

        let report = LoadReport::new(run_id, started_at, outcome, results);
        info!(
            %run_id,
            success = report.is_success(),
            rows_affected = report.total_rows_affected(),
            "Load run finished"
        );
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backend::memory::{FailurePoint, MemoryDatabase, MemoryPool, Operation};
    use crate::error::FailureKind;
    use crate::types::{Column, LoadTask, TableDescriptor, TaskId};
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    fn descriptor(name: &str) -> Arc<TableDescriptor> {
        Arc::new(
            TableDescriptor::new(
                name,
                vec![Column::text("code")],
                Some(vec!["code".to_string()]),
            )
            .unwrap(),
        )
    }

    fn stage(index: usize, name: &str, tables: &[&str]) -> Stage {
        let tasks = tables
            .iter()
            .map(|t| LoadTask {
                id: TaskId {
                    stage: index,
                    table: t.to_string(),
                    chunk: 0,
                    chunks: 1,
                },
                descriptor: descriptor(t),
                rows: vec![crate::row!["a"], crate::row!["b"]],
            })
            .collect();
        Stage::new(name, tasks)
    }

    fn scheduler(db: &Arc<MemoryDatabase>) -> StageScheduler<MemoryPool> {
        let provider = Arc::new(MemoryPool::new(db.clone(), 4, Duration::from_secs(5)));
        StageScheduler::new(WorkerPool::new(provider, NonZeroUsize::new(4).unwrap()))
    }

    fn database(tables: &[&str]) -> Arc<MemoryDatabase> {
        let db = MemoryDatabase::new();
        for t in tables {
            db.create_table((*descriptor(t)).clone());
        }
        db
    }

    #[tokio::test]
    async fn test_all_stages_complete() {
        let db = database(&["a1", "a2", "b1"]);
        let mut scheduler = scheduler(&db);

        let report = scheduler
            .run(vec![stage(0, "A", &["a1", "a2"]), stage(1, "B", &["b1"])])
            .await;

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(scheduler.state(), SchedulerState::Completed);
        assert_eq!(report.total_rows_affected(), 6);
    }

    #[tokio::test]
    async fn test_failed_stage_skips_later_stages() {
        let db = database(&["a1", "a2", "b1", "c1"]);
        db.fail_on("a2", FailurePoint::CreateStaging);
        let mut scheduler = scheduler(&db);

        let report = scheduler
            .run(vec![
                stage(0, "A", &["a1", "a2"]),
                stage(1, "B", &["b1"]),
                stage(2, "C", &["c1"]),
            ])
            .await;

        assert_eq!(
            report.outcome,
            RunOutcome::Aborted {
                stage: 0,
                stage_name: "A".to_string()
            }
        );
        assert_eq!(scheduler.state(), SchedulerState::Aborted(0));
        assert_eq!(report.results.len(), 4);

        // The sibling in the failed stage still ran to completion
        assert_eq!(db.count("a1"), 2);

        for table in ["b1", "c1"] {
            let result = report.results.iter().find(|r| r.task.table == table).unwrap();
            assert_eq!(result.failure_kind(), Some(FailureKind::DependencyAbort));
            assert!(matches!(
                &result.outcome,
                crate::report::TaskOutcome::Failed { detail, .. } if detail.contains("'A'")
            ));
        }

        // Nothing touched the later stages' tables
        assert!(db
            .operations()
            .iter()
            .all(|op| op.table.as_deref() != Some("b1") && op.table.as_deref() != Some("c1")));
        assert!(db.operations().iter().any(|op| op.operation == Operation::Rollback));
    }

    #[tokio::test]
    async fn test_empty_run_completes() {
        let db = MemoryDatabase::new();
        let mut scheduler = scheduler(&db);
        let report = scheduler.run(vec![]).await;
        assert!(report.is_success());
        assert!(report.results.is_empty());
    }
}
