//! Salesload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Error types and logging setup shared by the salesload workspace members.
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias used by the
//!   extract reader and report writer
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//!
//! # Example
//!
//! ```no_run
//! use salesload_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("loader starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
