//! Salesload Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Staged, conflict-safe, parallel bulk loading of a sales export into a
//! relational schema.
//!
//! # Pipeline
//!
//! - **Extract**: [`extract`] reads the CSV export, cleans it and builds one
//!   [`RecordBatch`] per table
//! - **Plan**: [`plan::LoadPlan`] orders tables into stages and
//!   [`chunker`] splits every batch into bounded tasks
//! - **Schedule**: [`scheduler::StageScheduler`] runs stages in order and
//!   stops at the first failing stage
//! - **Load**: [`pool::WorkerPool`] runs a stage's tasks with bounded
//!   concurrency, each through [`loader::load`]
//! - **Report**: [`report::LoadReport`] holds one result per task
//!
//! Backends plug in through [`backend::ConnectionProvider`]: PostgreSQL and
//! MySQL pools, or the in-memory database used for dry runs.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use salesload_ingest::backend::PoolProvider;
//! use salesload_ingest::{config::LoaderConfig, db, extract, pipeline, schema};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LoaderConfig::load()?;
//!     let pool = db::create_pg_pool(&config.database).await?;
//!     let batches = extract::extract_file(Path::new("sales.csv"))?;
//!
//!     let report = pipeline::run(
//!         Arc::new(PoolProvider::new(pool)),
//!         &schema::default_layout()?,
//!         batches,
//!         &config,
//!     )
//!     .await?;
//!     println!("{}", report.summarize());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod chunker;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod loader;
pub mod pipeline;
pub mod plan;
pub mod pool;
pub mod report;
pub mod scheduler;
pub mod schema;
pub mod types;

pub use error::{FailureKind, LoadError};
pub use report::{LoadReport, LoadResult, RunOutcome, TaskOutcome};
pub use types::{Column, ColumnType, LoadTask, RecordBatch, Row, Stage, TableDescriptor, TaskId, Value};
