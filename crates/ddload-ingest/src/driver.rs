//! Ingestion driver
//!
//! Runs one load end to end:
//!
//! 1. survey the cluster
//! 2. size and provision the store
//! 3. start the worker pool, handing every worker the store handle once
//! 4. stream generated items through the pool and drain every outcome
//! 5. destroy the store
//!
//! Per-item failures never stop the run; they are logged and counted in the
//! [`IngestReport`]. Everything else is fatal.

use serde::Serialize;
use std::cell::Cell;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cluster::{survey_cluster, ClusterMembership};
use crate::config::IngestConfig;
use crate::error::{IngestError, PoolError, Result};
use crate::generator::WorkGenerator;
use crate::planner::plan;
use crate::pool::{TaskPanic, WorkerPool};
use crate::store::{StoreHandle, StoreService, StoreStats};
use ddload_common::types::record_key;
use ddload_common::units::human_bytes;
use ddload_common::{
    FailureKind, ItemFailure, ItemWriteError, Outcome, PayloadShape, StoreError, WorkItem,
};

/// Per-worker state: the store handle injected when the worker starts
pub struct WorkerContext {
    store: StoreHandle,
    processed: Cell<u64>,
}

impl WorkerContext {
    /// Pool initializer. Refuses a handle whose store is destroyed or does
    /// not answer.
    pub fn attach(store: StoreHandle) -> std::result::Result<Self, StoreError> {
        let stats = store.stats()?;
        debug!(entries = stats.entries, "Store handle attached");
        Ok(Self {
            store,
            processed: Cell::new(0),
        })
    }

    /// Build the record for `item` and write it under its key
    pub fn process(&self, item: &WorkItem, key_prefix: &str, shape: PayloadShape) -> Outcome {
        self.processed.set(self.processed.get() + 1);

        let key = record_key(key_prefix, item.index);
        let written = shape.build(item).and_then(|record| {
            self.store
                .put(&key, record)
                .map_err(|source| ItemWriteError::Write {
                    key: key.clone(),
                    source,
                })
        });

        match written {
            Ok(()) => Outcome::Stored {
                index: item.index,
                key,
            },
            Err(e) => Outcome::Failed(ItemFailure::from_error(item.index, Some(key), &e)),
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.get()
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        debug!(processed = self.processed.get(), "Releasing store handle");
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// Items the generator was asked to produce
    pub planned: u64,
    /// Items handed to workers
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub failures: Vec<ItemFailure>,
    pub byte_budget: u64,
    /// Store counters taken just before teardown
    pub store_stats: Option<StoreStats>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl IngestReport {
    fn new(planned: u64, byte_budget: u64) -> Self {
        Self {
            planned,
            submitted: 0,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            byte_budget,
            store_stats: None,
            elapsed: Duration::ZERO,
        }
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Stored { .. } => self.succeeded += 1,
            Outcome::Failed(failure) => {
                self.failed += 1;
                self.failures.push(failure);
            },
        }
    }

    /// Outcomes received, successful or not
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Successful items per second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.succeeded as f64 / secs
        } else {
            0.0
        }
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

fn panic_outcome(panic: TaskPanic<WorkItem>, key_prefix: &str) -> Outcome {
    Outcome::Failed(ItemFailure {
        index: panic.item.index,
        key: Some(record_key(key_prefix, panic.item.index)),
        kind: FailureKind::Panic,
        message: panic.message,
    })
}

/// Drives one ingestion run against a cluster and a store service
pub struct IngestionDriver<'a> {
    config: IngestConfig,
    membership: &'a dyn ClusterMembership,
    service: &'a dyn StoreService,
}

impl<'a> IngestionDriver<'a> {
    pub fn new(
        config: IngestConfig,
        membership: &'a dyn ClusterMembership,
        service: &'a dyn StoreService,
    ) -> Self {
        Self {
            config,
            membership,
            service,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Run the whole load. Blocks until every outcome is in and the store is
    /// gone.
    pub fn run(&self) -> Result<IngestReport> {
        let started = Instant::now();
        self.config.validate()?;

        let view = survey_cluster(self.membership)?;

        let generator = WorkGenerator::new(self.config.nitems, self.config.item_size_bytes());
        let total = generator.total();
        let budget = plan(&view, generator.estimated_bytes(), &self.config.planner)?;
        let mut report = IngestReport::new(total, budget.byte_budget());

        let store = self.service.create(budget)?;
        info!("Store provisioned");

        let pool = match WorkerPool::start(self.config.pool_size, WorkerContext::attach, store.clone())
        {
            Ok(pool) => pool,
            Err(e) => {
                error!(error = %e, "Worker pool failed to start; tearing down store");
                if let Err(teardown) = store.destroy() {
                    warn!(error = %teardown, "Store teardown after pool failure also failed");
                }
                return Err(e.into());
            },
        };
        info!(pool_size = pool.size(), "Worker pool started");

        let drained = self.drain(&pool, generator, &mut report);
        pool.join();

        match store.stats() {
            Ok(stats) => {
                info!(
                    entries = stats.entries,
                    used = %human_bytes(stats.bytes_used),
                    budget = %human_bytes(stats.byte_budget),
                    "Store usage before teardown"
                );
                report.store_stats = Some(stats);
            },
            Err(e) => warn!(error = %e, "Could not read store stats"),
        }

        let torn_down = store.destroy();
        if let (Err(_), Err(teardown)) = (&drained, &torn_down) {
            warn!(error = %teardown, "Store teardown failed after an aborted drain");
        }
        drained?;
        torn_down?;

        report.elapsed = started.elapsed();
        info!(
            "completed with {} failures out of {} items in {:.2}s ({:.1} items/s)",
            report.failed,
            report.completed(),
            report.elapsed.as_secs_f64(),
            report.throughput()
        );

        Ok(report)
    }

    fn drain(
        &self,
        pool: &WorkerPool<WorkerContext>,
        generator: WorkGenerator,
        report: &mut IngestReport,
    ) -> Result<()> {
        let total = generator.total();
        let progress_every = self.config.progress_every;
        let prefix = self.config.key_prefix.clone();
        let shape = self.config.payload;

        let work_prefix = prefix.clone();
        let mut results = pool.map_unordered(
            move |ctx: &WorkerContext, item: &WorkItem| ctx.process(item, &work_prefix, shape),
            generator,
            self.config.chunk_size,
        )?;

        for result in results.by_ref() {
            let outcome = result.unwrap_or_else(|panic| panic_outcome(panic, &prefix));
            if let Some(failure) = outcome.failure() {
                warn!("Worker caught an exception: {}", failure);
            }
            report.record(outcome);

            let done = report.completed();
            if done % progress_every == 0 || done == total {
                info!("loaded {} of {}", done, total);
            }
        }

        report.submitted = results.submitted().unwrap_or_else(|| results.received());
        if report.submitted != report.completed() {
            warn!(
                submitted = report.submitted,
                completed = report.completed(),
                "Result stream ended early"
            );
            return Err(IngestError::Pool(PoolError::Closed));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cluster::{NodeInfo, StaticMembership};
    use crate::store::MemoryStoreService;
    use ddload_common::Record;

    const GIB: u64 = 1 << 30;

    fn one_node() -> StaticMembership {
        StaticMembership::new(vec![NodeInfo {
            node_id: "node-a".to_string(),
            physical_memory_bytes: GIB,
        }])
    }

    fn small_config(nitems: u64) -> IngestConfig {
        let mut config = IngestConfig {
            nitems,
            item_mb: 0.01,
            pool_size: 2,
            chunk_size: 3,
            progress_every: 2,
            ..IngestConfig::default()
        };
        config.planner.headroom_factor = 4.0;
        config.planner.node_memory_fraction = 0.5;
        config
    }

    #[test]
    fn test_worker_context_writes_record() {
        let store = MemoryStoreService::new(1)
            .create(
                plan(
                    &survey_cluster(&one_node()).unwrap(),
                    1 << 20,
                    &small_config(2).planner,
                )
                .unwrap(),
            )
            .unwrap();
        let ctx = WorkerContext::attach(store.clone()).unwrap();

        let outcome = ctx.process(&WorkItem::new(7, 16), "k_", PayloadShape::Blob);

        assert_eq!(
            outcome,
            Outcome::Stored {
                index: 7,
                key: "k_7".to_string()
            }
        );
        assert_eq!(ctx.processed(), 1);
        assert_eq!(store.get("k_7").unwrap(), Some(Record::Blob(vec![0; 16])));
    }

    #[test]
    fn test_attach_refuses_destroyed_store() {
        let store = MemoryStoreService::new(1)
            .create(
                plan(
                    &survey_cluster(&one_node()).unwrap(),
                    1 << 20,
                    &small_config(2).planner,
                )
                .unwrap(),
            )
            .unwrap();
        let copy = store.clone();
        store.destroy().unwrap();

        assert!(matches!(
            WorkerContext::attach(copy),
            Err(StoreError::Destroyed)
        ));
    }

    #[test]
    fn test_run_reports_every_item() {
        let membership = one_node();
        let service = MemoryStoreService::new(1);
        let driver = IngestionDriver::new(small_config(25), &membership, &service);

        let report = driver.run().unwrap();

        assert_eq!(report.planned, 24);
        assert_eq!(report.submitted, 24);
        assert_eq!(report.succeeded, 24);
        assert!(report.is_clean());
        assert_eq!(report.store_stats.map(|s| s.entries), Some(24));
    }

    #[test]
    fn test_zero_items_yield_zero_budget() {
        let membership = one_node();
        let service = MemoryStoreService::new(1);
        let result = IngestionDriver::new(small_config(1), &membership, &service).run();

        assert!(matches!(result, Err(IngestError::Config(_))));
    }

    #[test]
    fn test_report_serializes_elapsed_as_seconds() {
        let mut report = IngestReport::new(3, 100);
        report.record(Outcome::Stored {
            index: 1,
            key: "k1".to_string(),
        });
        report.elapsed = Duration::from_millis(1500);

        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["elapsed"], 1.5);
        assert_eq!(json["succeeded"], 1);
        assert!((report.throughput() - 1.0 / 1.5).abs() < 1e-9);
    }
}
