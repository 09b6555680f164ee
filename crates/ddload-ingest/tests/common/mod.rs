//! Shared fixtures for ingest integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ddload_common::{Record, StoreError};
use ddload_ingest::cluster::{NodeInfo, StaticMembership};
use ddload_ingest::config::IngestConfig;
use ddload_ingest::planner::CapacityBudget;
use ddload_ingest::store::{ShardedMemoryStore, StoreBackend, StoreHandle, StoreService, StoreStats};
use ddload_ingest::ProvisionError;

pub const GIB: u64 = 1 << 30;

/// What the recording backend saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Put(String),
    Destroy,
}

/// Shared view of everything that happened to stores a service created
#[derive(Debug, Default)]
pub struct Journal {
    pub events: Mutex<Vec<Event>>,
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
}

impl Journal {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn puts(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Put(_)))
            .count()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// In-memory store that journals writes and can be told to misbehave
pub struct RecordingBackend {
    inner: ShardedMemoryStore,
    journal: Arc<Journal>,
    fail_keys: HashSet<String>,
    panic_keys: HashSet<String>,
    unreachable: bool,
}

impl StoreBackend for RecordingBackend {
    fn put(&self, key: &str, value: Record) -> Result<(), StoreError> {
        if self.panic_keys.contains(key) {
            panic!("injected panic writing {}", key);
        }
        if self.fail_keys.contains(key) {
            return Err(StoreError::Backend(format!("injected failure for {}", key)));
        }
        self.inner.put(key, value)?;
        self.journal
            .events
            .lock()
            .unwrap()
            .push(Event::Put(key.to_string()));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Record>, StoreError> {
        self.inner.get(key)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        if self.unreachable {
            return Err(StoreError::Backend("store unreachable".to_string()));
        }
        self.inner.stats()
    }

    fn destroy(&self) -> Result<(), StoreError> {
        self.inner.destroy()?;
        self.journal.destroyed.fetch_add(1, Ordering::SeqCst);
        self.journal.events.lock().unwrap().push(Event::Destroy);
        Ok(())
    }
}

/// Store service handing out [`RecordingBackend`]s
#[derive(Default)]
pub struct RecordingService {
    pub journal: Arc<Journal>,
    pub fail_keys: HashSet<String>,
    pub panic_keys: HashSet<String>,
    pub reject: Option<ProvisionError>,
    /// Stores answer writes but fail health checks
    pub unreachable: bool,
    /// Hand out handles that were already torn down
    pub pre_destroyed: bool,
}

impl RecordingService {
    pub fn failing(keys: &[&str]) -> Self {
        Self {
            fail_keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn panicking(keys: &[&str]) -> Self {
        Self {
            panic_keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn pre_destroyed() -> Self {
        Self {
            pre_destroyed: true,
            ..Self::default()
        }
    }

    pub fn rejecting(error: ProvisionError) -> Self {
        Self {
            reject: Some(error),
            ..Self::default()
        }
    }
}

impl StoreService for RecordingService {
    fn create(&self, budget: CapacityBudget) -> Result<StoreHandle, ProvisionError> {
        if let Some(error) = &self.reject {
            return Err(error.clone());
        }
        let inner = ShardedMemoryStore::new(budget)?;
        self.journal.created.fetch_add(1, Ordering::SeqCst);
        let handle = StoreHandle::new(RecordingBackend {
            inner,
            journal: Arc::clone(&self.journal),
            fail_keys: self.fail_keys.clone(),
            panic_keys: self.panic_keys.clone(),
            unreachable: self.unreachable,
        });
        if self.pre_destroyed {
            handle.clone().destroy().unwrap();
        }
        Ok(handle)
    }
}

/// One node with `bytes` of physical memory
pub fn single_node(bytes: u64) -> StaticMembership {
    StaticMembership::new(vec![NodeInfo {
        node_id: "node-0".to_string(),
        physical_memory_bytes: bytes,
    }])
}

/// Ten requested 1 MiB items on two workers, 4x headroom, half the memory
pub fn scenario_config() -> IngestConfig {
    let mut config = IngestConfig {
        nitems: 10,
        item_mb: 1.0,
        pool_size: 2,
        chunk_size: 2,
        progress_every: 3,
        ..IngestConfig::default()
    };
    config.planner.headroom_factor = 4.0;
    config.planner.node_memory_fraction = 0.5;
    config
}
