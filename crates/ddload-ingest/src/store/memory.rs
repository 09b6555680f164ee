//! In-process sharded store
//!
//! Stands in for the cluster store when running on one host or in tests.
//! The budget is split evenly across `shards_per_node * node_count`
//! managers and keys are placed by hash, so a single hot manager can fill up
//! before the store as a whole does.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{StoreBackend, StoreHandle, StoreService, StoreStats};
use crate::error::ProvisionError;
use crate::planner::CapacityBudget;
use ddload_common::{Record, StoreError};

#[derive(Default)]
struct ManagerState {
    entries: HashMap<String, Record>,
    used: u64,
    destroyed: bool,
}

struct Manager {
    node: usize,
    capacity: u64,
    state: Mutex<ManagerState>,
}

impl Manager {
    fn lock(&self, index: usize) -> Result<MutexGuard<'_, ManagerState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend(format!("manager {} lock poisoned", index)))
    }
}

/// Hash-partitioned in-memory store with per-manager capacity accounting
pub struct ShardedMemoryStore {
    managers: Vec<Manager>,
    byte_budget: u64,
}

// Entries can be tens of megabytes each; show the layout, not the contents.
impl std::fmt::Debug for ShardedMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedMemoryStore")
            .field("managers", &self.managers.len())
            .field("byte_budget", &self.byte_budget)
            .finish()
    }
}

impl ShardedMemoryStore {
    /// Lay out managers for a budget. Capacity is split evenly; the remainder
    /// goes to the first managers.
    pub fn new(budget: CapacityBudget) -> Result<Self, ProvisionError> {
        let count = budget.manager_count();
        let total = budget.byte_budget();
        if count == 0 || total < count as u64 {
            return Err(ProvisionError::BudgetTooSmall {
                budget: total,
                managers: count,
            });
        }

        let base = total / count as u64;
        let remainder = (total % count as u64) as usize;
        let managers = (0..count)
            .map(|i| Manager {
                node: i / budget.shards_per_node(),
                capacity: base + u64::from(i < remainder),
                state: Mutex::new(ManagerState::default()),
            })
            .collect();

        Ok(Self {
            managers,
            byte_budget: total,
        })
    }

    pub fn manager_count(&self) -> usize {
        self.managers.len()
    }

    /// Node a manager was placed on
    pub fn manager_node(&self, manager: usize) -> Option<usize> {
        self.managers.get(manager).map(|m| m.node)
    }

    /// Manager responsible for a key
    pub fn manager_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.managers.len() as u64) as usize
    }
}

impl StoreBackend for ShardedMemoryStore {
    fn put(&self, key: &str, value: Record) -> Result<(), StoreError> {
        let index = self.manager_for(key);
        let manager = &self.managers[index];
        let mut state = manager.lock(index)?;
        if state.destroyed {
            return Err(StoreError::Destroyed);
        }

        let incoming = key.len() as u64 + value.footprint_bytes();
        let replaced = state
            .entries
            .get(key)
            .map(|old| key.len() as u64 + old.footprint_bytes())
            .unwrap_or(0);
        let available = manager.capacity - (state.used - replaced);
        if incoming > available {
            return Err(StoreError::CapacityExceeded {
                manager: index,
                requested: incoming,
                available,
            });
        }

        state.used = state.used - replaced + incoming;
        state.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Record>, StoreError> {
        let index = self.manager_for(key);
        let state = self.managers[index].lock(index)?;
        if state.destroyed {
            return Err(StoreError::Destroyed);
        }
        Ok(state.entries.get(key).cloned())
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats {
            byte_budget: self.byte_budget,
            managers: self.managers.len(),
            ..StoreStats::default()
        };
        for (index, manager) in self.managers.iter().enumerate() {
            let state = manager.lock(index)?;
            stats.entries += state.entries.len();
            stats.bytes_used += state.used;
        }
        Ok(stats)
    }

    fn destroy(&self) -> Result<(), StoreError> {
        for (index, manager) in self.managers.iter().enumerate() {
            let mut state = manager.lock(index)?;
            if state.destroyed {
                return Err(StoreError::Destroyed);
            }
            state.entries = HashMap::new();
            state.used = 0;
            state.destroyed = true;
        }
        debug!(managers = self.managers.len(), "Released all managers");
        Ok(())
    }
}

/// Provisions [`ShardedMemoryStore`] instances for a known number of nodes
#[derive(Debug, Clone)]
pub struct MemoryStoreService {
    available_nodes: usize,
}

impl MemoryStoreService {
    pub fn new(available_nodes: usize) -> Self {
        Self { available_nodes }
    }
}

impl StoreService for MemoryStoreService {
    fn create(&self, budget: CapacityBudget) -> Result<StoreHandle, ProvisionError> {
        if budget.node_count() > self.available_nodes {
            return Err(ProvisionError::InsufficientNodes {
                requested: budget.node_count(),
                available: self.available_nodes,
            });
        }
        let store = ShardedMemoryStore::new(budget)?;
        debug!(
            managers = store.manager_count(),
            byte_budget = store.byte_budget,
            "Provisioned in-memory store"
        );
        Ok(StoreHandle::new(store))
    }
}
