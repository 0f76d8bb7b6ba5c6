//! Bounded-concurrency execution of load tasks
//!
//! Tasks are driven with `buffer_unordered`, so at most `max_concurrency`
//! task bodies are in flight, each holding one connection from acquire to
//! release. A failing task becomes a failed [`LoadResult`]; its siblings keep
//! running.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::backend::ConnectionProvider;
use crate::error::LoadError;
use crate::loader;
use crate::report::LoadResult;
use crate::types::LoadTask;

pub struct WorkerPool<P> {
    provider: Arc<P>,
    max_concurrency: NonZeroUsize,
}

impl<P: ConnectionProvider> WorkerPool<P> {
    pub fn new(provider: Arc<P>, max_concurrency: NonZeroUsize) -> Self {
        if let Some(max) = provider.max_connections() {
            if max_concurrency.get() > max as usize {
                warn!(
                    max_concurrency = max_concurrency.get(),
                    max_connections = max,
                    "Concurrency exceeds pool size; extra tasks will wait for connections"
                );
            }
        }

        Self {
            provider,
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.get()
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Run every task and return exactly one result per task, in completion
    /// order
    pub async fn run(&self, tasks: Vec<LoadTask>) -> Vec<LoadResult> {
        let total = tasks.len();
        info!(
            tasks = total,
            concurrency = self.max_concurrency.get(),
            "Running load tasks"
        );

        let results: Vec<LoadResult> = stream::iter(tasks)
            .map(|task| self.run_task(task))
            .buffer_unordered(self.max_concurrency.get())
            .collect()
            .await;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            tasks = total,
            succeeded = total - failed,
            failed,
            "Load tasks complete"
        );

        results
    }

    async fn run_task(&self, task: LoadTask) -> LoadResult {
        let start = Instant::now();

        // Shape errors need no connection
        if let Err(e) = task.validate() {
            error!(task = %task.id, error = %e, "Task rejected");
            return LoadResult::failed(task.id, start.elapsed(), &e);
        }

        let mut conn = match self.provider.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(task = %task.id, error = %e, "Failed to acquire connection");
                return LoadResult::failed(task.id, start.elapsed(), &e);
            }
        };

        debug!(task = %task.id, rows = task.rows.len(), "Connection acquired");
        let outcome: Result<u64, LoadError> = loader::load(&mut conn, &task.descriptor, &task.rows).await;
        self.provider.release(conn).await;

        let elapsed = start.elapsed();
        match outcome {
            Ok(rows_affected) => {
                info!(
                    table = task.table(),
                    chunk = task.id.chunk + 1,
                    chunks = task.id.chunks,
                    rows = task.rows.len(),
                    rows_affected,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Chunk loaded"
                );
                LoadResult::succeeded(task.id, elapsed, rows_affected)
            }
            Err(e) => {
                error!(
                    table = task.table(),
                    chunk = task.id.chunk + 1,
                    chunks = task.id.chunks,
                    kind = %e.kind(),
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Chunk failed"
                );
                LoadResult::failed(task.id, elapsed, &e)
            }
        }
    }
}
