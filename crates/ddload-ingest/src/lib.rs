//! ddload ingest library
//!
//! Bulk-loads generated records into a sharded key-value store.
//!
//! # Pipeline
//!
//! - [`cluster`]: list the nodes and their physical memory
//! - [`planner`]: turn the data estimate into a store byte budget
//! - [`store`]: provision the store and share one handle
//! - [`generator`]: produce work items lazily
//! - [`pool`]: fixed worker pool with per-worker state
//! - [`driver`]: wire it together, report progress, tear down
//!
//! # Example
//!
//! ```no_run
//! use ddload_ingest::cluster::LocalHost;
//! use ddload_ingest::config::IngestConfig;
//! use ddload_ingest::driver::IngestionDriver;
//! use ddload_ingest::store::MemoryStoreService;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let membership = LocalHost::new();
//!     let service = MemoryStoreService::new(1);
//!
//!     let report = IngestionDriver::new(config, &membership, &service).run()?;
//!     println!("{} of {} items stored", report.succeeded, report.completed());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod cluster;
pub mod config;
pub mod driver;
pub mod error;
pub mod generator;
pub mod planner;
pub mod pool;
pub mod store;

pub use config::IngestConfig;
pub use driver::{IngestReport, IngestionDriver, WorkerContext};
pub use error::{IngestError, PoolError, ProvisionError, Result};
