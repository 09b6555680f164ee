//! ddload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the ddload workspace.
//!
//! - **Types**: work items, record payloads, per-item outcomes
//! - **Errors**: store and per-item write errors
//! - **Logging**: the one place the `tracing` subscriber is installed
//!
//! # Example
//!
//! ```
//! use ddload_common::types::{PayloadShape, WorkItem};
//!
//! let record = PayloadShape::Blob.build(&WorkItem::new(1, 1024)).unwrap();
//! assert_eq!(record.footprint_bytes(), 1024);
//! ```

pub mod error;
pub mod logging;
pub mod types;
pub mod units;

// Re-export commonly used types
pub use error::{FailureKind, ItemWriteError, StoreError};
pub use types::{ItemFailure, Outcome, PayloadShape, Record, WorkItem};
