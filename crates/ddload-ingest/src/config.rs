//! Ingestion configuration
//!
//! Every knob has a compile-time default; `DDLOAD_*` environment variables
//! (optionally from a `.env` file) override the defaults, and CLI flags
//! override the environment.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{IngestError, Result};
use crate::planner::PlannerPolicy;
use ddload_common::types::DEFAULT_KEY_PREFIX;
use ddload_common::units::mib_to_bytes;
use ddload_common::PayloadShape;

// ============================================================================
// Defaults
// ============================================================================

/// Default requested item count; the generator yields one fewer.
pub const DEFAULT_NITEMS: u64 = 1000;

/// Default payload size per item, in MiB.
pub const DEFAULT_ITEM_MB: f64 = 50.0;

/// Default number of items per dispatched chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Default progress cadence, in completed items.
pub const DEFAULT_PROGRESS_EVERY: u64 = 100;

/// Default store managers per node.
pub const DEFAULT_SHARDS_PER_NODE: usize = 2;

/// Default multiplier on the estimated data volume.
pub const DEFAULT_HEADROOM_FACTOR: f64 = 2.0;

/// Default ceiling on store size as a fraction of cluster memory.
pub const DEFAULT_MEMORY_FRACTION: f64 = 0.1;

/// Default width of each structured-record entry, in bytes.
pub const DEFAULT_ENTRY_WIDTH: usize = 64;

/// Logical cores per pool worker when the pool size is not set.
pub const CORES_PER_WORKER: usize = 8;

/// Pool size derived from the host's parallelism
pub fn default_pool_size() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores / CORES_PER_WORKER).max(1)
}

/// Payload shape names accepted by `DDLOAD_PAYLOAD` and `--payload`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    #[default]
    Blob,
    Structured,
}

impl PayloadKind {
    pub fn shape(self, entry_width: usize) -> PayloadShape {
        match self {
            PayloadKind::Blob => PayloadShape::Blob,
            PayloadKind::Structured => PayloadShape::Structured { entry_width },
        }
    }
}

impl FromStr for PayloadKind {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blob" | "bytes" => Ok(PayloadKind::Blob),
            "structured" | "record" => Ok(PayloadKind::Structured),
            _ => Err(IngestError::Config(format!("Invalid payload kind: {}", s))),
        }
    }
}

/// Everything a run needs besides its collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Requested item count (the generator yields `nitems - 1`)
    pub nitems: u64,
    /// Payload size per item, in MiB
    pub item_mb: f64,
    pub pool_size: usize,
    pub chunk_size: usize,
    /// Log progress every this many completed items
    pub progress_every: u64,
    pub key_prefix: String,
    pub payload: PayloadShape,
    pub planner: PlannerPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            nitems: DEFAULT_NITEMS,
            item_mb: DEFAULT_ITEM_MB,
            pool_size: default_pool_size(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_every: DEFAULT_PROGRESS_EVERY,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            payload: PayloadShape::Blob,
            planner: PlannerPolicy {
                shards_per_node: DEFAULT_SHARDS_PER_NODE,
                node_count: None,
                headroom_factor: DEFAULT_HEADROOM_FACTOR,
                node_memory_fraction: DEFAULT_MEMORY_FRACTION,
            },
        }
    }
}

impl IngestConfig {
    /// Load configuration from the environment on top of the defaults
    ///
    /// Environment variables:
    /// - `DDLOAD_NITEMS`, `DDLOAD_ITEM_MB`
    /// - `DDLOAD_POOL_SIZE`, `DDLOAD_CHUNK_SIZE`, `DDLOAD_PROGRESS_EVERY`
    /// - `DDLOAD_SHARDS_PER_NODE`, `DDLOAD_NODE_COUNT`
    /// - `DDLOAD_HEADROOM`, `DDLOAD_MEMORY_FRACTION`
    /// - `DDLOAD_KEY_PREFIX`, `DDLOAD_PAYLOAD` (blob|structured), `DDLOAD_ENTRY_WIDTH`
    ///
    /// Only parses. Call [`validate`](Self::validate) once every override
    /// has been applied.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let payload_kind: PayloadKind = env_or("DDLOAD_PAYLOAD", PayloadKind::Blob)?;
        let entry_width = env_or("DDLOAD_ENTRY_WIDTH", DEFAULT_ENTRY_WIDTH)?;

        let config = Self {
            nitems: env_or("DDLOAD_NITEMS", defaults.nitems)?,
            item_mb: env_or("DDLOAD_ITEM_MB", defaults.item_mb)?,
            pool_size: env_or("DDLOAD_POOL_SIZE", defaults.pool_size)?,
            chunk_size: env_or("DDLOAD_CHUNK_SIZE", defaults.chunk_size)?,
            progress_every: env_or("DDLOAD_PROGRESS_EVERY", defaults.progress_every)?,
            key_prefix: std::env::var("DDLOAD_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            payload: payload_kind.shape(entry_width),
            planner: PlannerPolicy {
                shards_per_node: env_or("DDLOAD_SHARDS_PER_NODE", DEFAULT_SHARDS_PER_NODE)?,
                node_count: env_opt("DDLOAD_NODE_COUNT")?,
                headroom_factor: env_or("DDLOAD_HEADROOM", DEFAULT_HEADROOM_FACTOR)?,
                node_memory_fraction: env_or("DDLOAD_MEMORY_FRACTION", DEFAULT_MEMORY_FRACTION)?,
            },
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.item_mb.is_finite() && self.item_mb > 0.0) {
            return Err(IngestError::Config(format!(
                "item_mb must be a positive number, got {}",
                self.item_mb
            )));
        }

        if self.pool_size == 0 {
            return Err(IngestError::Config("pool_size must be greater than 0".to_string()));
        }

        if self.chunk_size == 0 {
            return Err(IngestError::Config("chunk_size must be greater than 0".to_string()));
        }

        if self.progress_every == 0 {
            return Err(IngestError::Config("progress_every must be greater than 0".to_string()));
        }

        if let PayloadShape::Structured { entry_width: 0 } = self.payload {
            return Err(IngestError::Config("entry_width must be greater than 0".to_string()));
        }

        if self.nitems < 2 {
            tracing::warn!(
                nitems = self.nitems,
                "Fewer than 2 items requested; nothing will be generated"
            );
        }

        self.planner.validate()
    }

    /// Payload size per item in bytes
    pub fn item_size_bytes(&self) -> u64 {
        mib_to_bytes(self.item_mb)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    Ok(env_opt(name)?.unwrap_or(default))
}

fn env_opt<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| IngestError::Config(format!("{} has invalid value '{}': {}", name, raw, e))),
        _ => Ok(None),
    }
}
