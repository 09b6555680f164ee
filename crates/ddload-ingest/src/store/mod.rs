//! Store provisioning and the shared store handle
//!
//! The distributed store itself lives behind two traits:
//!
//! - [`StoreService`] creates a store from a [`CapacityBudget`]
//! - [`StoreBackend`] is one live store: `put`, `get`, `destroy`
//!
//! Callers never hold a backend directly. They hold a [`StoreHandle`], a cheap
//! clonable capability that the driver and every worker share. A handle is
//! destroyed exactly once; any use afterwards fails with
//! [`StoreError::Destroyed`].

pub mod memory;

pub use memory::{MemoryStoreService, ShardedMemoryStore};

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::error::ProvisionError;
use crate::planner::CapacityBudget;
use ddload_common::{Record, StoreError};

/// Point-in-time counters reported by a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entries: usize,
    pub bytes_used: u64,
    pub byte_budget: u64,
    pub managers: usize,
}

/// One live store instance
pub trait StoreBackend: Send + Sync {
    /// Write `value` under `key`, replacing any previous value
    fn put(&self, key: &str, value: Record) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<Record>, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Release every resource held by the store
    fn destroy(&self) -> Result<(), StoreError>;
}

/// Creates stores on request
pub trait StoreService {
    fn create(&self, budget: CapacityBudget) -> Result<StoreHandle, ProvisionError>;
}

struct HandleInner {
    backend: Box<dyn StoreBackend>,
    destroyed: AtomicBool,
}

/// Shared capability referencing a provisioned store
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("destroyed", &self.is_destroyed())
            .field("holders", &Arc::strong_count(&self.inner))
            .finish()
    }
}

impl StoreHandle {
    pub fn new<B: StoreBackend + 'static>(backend: B) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                backend: Box::new(backend),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn put(&self, key: &str, value: Record) -> Result<(), StoreError> {
        self.ensure_live()?;
        self.inner.backend.put(key, value)
    }

    pub fn get(&self, key: &str) -> Result<Option<Record>, StoreError> {
        self.ensure_live()?;
        self.inner.backend.get(key)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        self.ensure_live()?;
        self.inner.backend.stats()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Tear the store down.
    ///
    /// Only the first call across all clones reaches the backend. Must not run
    /// while workers still have writes in flight.
    pub fn destroy(self) -> Result<(), StoreError> {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Destroyed);
        }
        self.inner.backend.destroy()?;
        info!("Store destroyed");
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), StoreError> {
        if self.is_destroyed() {
            Err(StoreError::Destroyed)
        } else {
            Ok(())
        }
    }
}
