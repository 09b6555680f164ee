//! Common types used across ddload

mod record;

pub use record::{PayloadShape, Record, StructuredRecord, UNPROCESSED_ITERATION};

use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, ItemWriteError};

/// Default prefix for generated record keys
pub const DEFAULT_KEY_PREFIX: &str = "some_key_";

/// Derive the store key for a work item index
pub fn record_key(prefix: &str, index: u64) -> String {
    format!("{prefix}{index}")
}

/// One unit of generation-and-write work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    /// Record identity; the store key is derived from it
    pub index: u64,
    /// Requested payload size in bytes
    pub target_size_bytes: u64,
}

impl WorkItem {
    pub fn new(index: u64, target_size_bytes: u64) -> Self {
        Self {
            index,
            target_size_bytes,
        }
    }
}

/// A captured per-item failure.
///
/// Carries enough detail to find the failing key or index in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub index: u64,
    /// `None` when the failure happened before a key could be derived
    pub key: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

impl ItemFailure {
    pub fn from_error(index: u64, key: Option<String>, error: &ItemWriteError) -> Self {
        Self {
            index,
            key,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(
                f,
                "{} error on item {} ({}): {}",
                self.kind, self.index, key, self.message
            ),
            None => write!(f, "{} error on item {}: {}", self.kind, self.index, self.message),
        }
    }
}

/// Result of processing one work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Stored { index: u64, key: String },
    Failed(ItemFailure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Stored { .. })
    }

    pub fn index(&self) -> u64 {
        match self {
            Outcome::Stored { index, .. } => *index,
            Outcome::Failed(failure) => failure.index,
        }
    }

    pub fn failure(&self) -> Option<&ItemFailure> {
        match self {
            Outcome::Stored { .. } => None,
            Outcome::Failed(failure) => Some(failure),
        }
    }
}
