//! Plan, schedule and run a set of record batches

use std::sync::Arc;

use tracing::info;

use crate::backend::ConnectionProvider;
use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::plan::LoadPlan;
use crate::pool::WorkerPool;
use crate::report::LoadReport;
use crate::scheduler::StageScheduler;
use crate::types::RecordBatch;

/// Load `batches` through `provider` following `plan`.
///
/// Only configuration problems are returned as errors, and they are found
/// before any connection is acquired. Everything that happens once loading
/// starts is reported in the [`LoadReport`].
pub async fn run<P: ConnectionProvider>(
    provider: Arc<P>,
    plan: &LoadPlan,
    batches: Vec<RecordBatch>,
    config: &LoaderConfig,
) -> Result<LoadReport, LoadError> {
    let chunk_size = config.chunk_size()?;
    let concurrency = config.max_concurrency()?;

    let stages = plan.build(batches, chunk_size)?;
    info!(
        stages = stages.len(),
        tasks = stages.iter().map(|s| s.tasks.len()).sum::<usize>(),
        chunk_size = chunk_size.get(),
        concurrency = concurrency.get(),
        "Load plan built"
    );

    let mut scheduler = StageScheduler::new(WorkerPool::new(provider, concurrency));
    Ok(scheduler.run(stages).await)
}
