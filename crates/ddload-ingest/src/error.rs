//! Error types for the ingest harness

use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Fatal errors that stop an ingestion run
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Cluster unavailable: {0}")]
    ClusterUnavailable(String),

    #[error("Store provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Worker pool failed: {0}")]
    Pool(#[from] PoolError),

    #[error("Store teardown failed: {0}")]
    Teardown(#[from] ddload_common::StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The store service refused to create a store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("requested {requested} nodes but only {available} are available")]
    InsufficientNodes { requested: usize, available: usize },

    #[error("budget of {budget} bytes cannot be split across {managers} managers")]
    BudgetTooSmall { budget: u64, managers: usize },

    #[error("store service rejected the request: {0}")]
    Rejected(String),
}

/// Worker pool lifecycle failures
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool size must be at least 1")]
    EmptyPool,

    #[error("chunk size must be at least 1")]
    EmptyChunk,

    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn dispatcher: {0}")]
    DispatcherSpawn(#[source] std::io::Error),

    #[error("worker {worker} failed to initialize: {message}")]
    WorkerInit { worker: usize, message: String },

    #[error("worker runtime is already configured")]
    RuntimeAlreadyConfigured,

    #[error("worker pool has shut down")]
    Closed,
}
