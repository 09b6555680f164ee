//! Error types shared between the store boundary and the ingest workers

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a distributed store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store has already been destroyed")]
    Destroyed,

    #[error("manager {manager} is full: {requested} bytes requested, {available} bytes available")]
    CapacityExceeded {
        manager: usize,
        requested: u64,
        available: u64,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Failure while building or writing a single record.
///
/// These never cross the worker boundary as errors; the worker turns them
/// into a failed [`Outcome`](crate::types::Outcome).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemWriteError {
    #[error("failed to build record for item {index}: {reason}")]
    Build { index: u64, reason: String },

    #[error("failed to write key {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl ItemWriteError {
    /// Classify the error for reporting
    pub fn kind(&self) -> FailureKind {
        match self {
            ItemWriteError::Build { .. } => FailureKind::Build,
            ItemWriteError::Write { source, .. } => match source {
                StoreError::Destroyed => FailureKind::StoreDestroyed,
                StoreError::CapacityExceeded { .. } => FailureKind::CapacityExceeded,
                StoreError::Backend(_) => FailureKind::Backend,
            },
        }
    }
}

/// Coarse classification of a per-item failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Record construction failed
    Build,
    /// The target manager had no room left
    CapacityExceeded,
    /// The store was destroyed while the write was in flight
    StoreDestroyed,
    /// Any other backend failure
    Backend,
    /// The work function panicked
    Panic,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Build => write!(f, "build"),
            FailureKind::CapacityExceeded => write!(f, "capacity_exceeded"),
            FailureKind::StoreDestroyed => write!(f, "store_destroyed"),
            FailureKind::Backend => write!(f, "backend"),
            FailureKind::Panic => write!(f, "panic"),
        }
    }
}
