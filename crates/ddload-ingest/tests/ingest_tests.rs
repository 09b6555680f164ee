//! End-to-end tests for the ingestion driver
//!
//! These tests verify:
//! - Every generated item produces exactly one outcome
//! - The store is destroyed once, after the last outcome
//! - Per-item failures and panics are captured without stopping the run
//! - Provisioning failures stop the run before anything is written
//! - A pool that cannot start still tears the provisioned store down

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;

use ddload_common::types::{record_key, StructuredRecord, UNPROCESSED_ITERATION};
use ddload_common::{FailureKind, PayloadShape, Record, WorkItem};
use ddload_ingest::cluster::{survey_cluster, StaticMembership};
use ddload_ingest::planner::plan;
use ddload_ingest::store::{MemoryStoreService, StoreService};
use ddload_ingest::{IngestError, IngestionDriver, PoolError, ProvisionError, WorkerContext};

mod common;

use common::{scenario_config, single_node, Event, RecordingService, GIB};

#[test]
fn test_ten_requested_items_store_nine_then_destroy() {
    let membership = single_node(GIB);
    let service = RecordingService::default();

    let report = IngestionDriver::new(scenario_config(), &membership, &service)
        .run()
        .unwrap();

    assert_eq!(report.planned, 9);
    assert_eq!(report.submitted, 9);
    assert_eq!(report.succeeded, 9);
    assert_eq!(report.failed, 0);
    assert!(report.is_clean());

    // 9 MiB estimate x 4 headroom, well under half of 1 GiB
    assert_eq!(report.byte_budget, 36 * 1024 * 1024);

    let journal = &service.journal;
    assert_eq!(journal.created(), 1);
    assert_eq!(journal.destroyed(), 1);

    let events = journal.events();
    assert_eq!(events.len(), 10);
    assert_eq!(events.last(), Some(&Event::Destroy));
    let keys: HashSet<String> = events
        .iter()
        .filter_map(|e| match e {
            Event::Put(key) => Some(key.clone()),
            Event::Destroy => None,
        })
        .collect();
    let expected: HashSet<String> = (1..10).map(|i| record_key("some_key_", i)).collect();
    assert_eq!(keys, expected);
}

#[test]
fn test_every_item_has_exactly_one_outcome() {
    let membership = single_node(4 * GIB);
    let service = RecordingService::default();
    let mut config = scenario_config();
    config.nitems = 301;
    config.item_mb = 0.01;
    config.pool_size = 4;
    config.chunk_size = 7;

    let report = IngestionDriver::new(config, &membership, &service)
        .run()
        .unwrap();

    assert_eq!(report.completed(), 300);
    assert_eq!(report.submitted, 300);
    assert_eq!(service.journal.puts(), 300);
    assert_eq!(service.journal.destroyed(), 1);
}

#[test]
fn test_failing_item_does_not_stop_the_run() {
    let membership = single_node(GIB);
    let service = RecordingService::failing(&["some_key_5"]);

    let report = IngestionDriver::new(scenario_config(), &membership, &service)
        .run()
        .unwrap();

    assert_eq!(report.succeeded, 8);
    assert_eq!(report.failed, 1);
    assert!(!report.is_clean());

    let failure = &report.failures[0];
    assert_eq!(failure.index, 5);
    assert_eq!(failure.key.as_deref(), Some("some_key_5"));
    assert_eq!(failure.kind, FailureKind::Backend);
    assert!(failure.message.contains("injected failure"));

    assert_eq!(service.journal.destroyed(), 1);
}

#[test]
fn test_panicking_write_is_captured() {
    let membership = single_node(GIB);
    let service = RecordingService::panicking(&["some_key_3", "some_key_7"]);

    let report = IngestionDriver::new(scenario_config(), &membership, &service)
        .run()
        .unwrap();

    assert_eq!(report.succeeded, 7);
    assert_eq!(report.failed, 2);

    let mut failed: Vec<u64> = report.failures.iter().map(|f| f.index).collect();
    failed.sort_unstable();
    assert_eq!(failed, vec![3, 7]);
    assert!(report.failures.iter().all(|f| f.kind == FailureKind::Panic));
    assert!(report.failures[0].message.contains("injected panic"));

    assert_eq!(service.journal.destroyed(), 1);
}

#[test]
fn test_item_over_manager_capacity_fails_alone() {
    let membership = single_node(GIB);
    let service = RecordingService::default();
    let mut config = scenario_config();
    // Budget capped at 1% of 1 GiB over 2 managers: ~5 MiB each, 8 MiB items
    config.item_mb = 8.0;
    config.planner.node_memory_fraction = 0.01;

    let report = IngestionDriver::new(config, &membership, &service)
        .run()
        .unwrap();

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 9);
    assert!(report
        .failures
        .iter()
        .all(|f| f.kind == FailureKind::CapacityExceeded));
    assert_eq!(service.journal.destroyed(), 1);
}

#[test]
fn test_rejected_provisioning_never_destroys() {
    let membership = single_node(GIB);
    let service = RecordingService::rejecting(ProvisionError::Rejected("quota".to_string()));

    let err = IngestionDriver::new(scenario_config(), &membership, &service)
        .run()
        .unwrap_err();

    assert!(matches!(err, IngestError::Provision(ProvisionError::Rejected(_))));
    assert_eq!(service.journal.created(), 0);
    assert_eq!(service.journal.destroyed(), 0);
    assert!(service.journal.events().is_empty());
}

#[test]
fn test_pool_start_failure_destroys_store() {
    let membership = single_node(GIB);
    let service = RecordingService::unreachable();

    let err = IngestionDriver::new(scenario_config(), &membership, &service)
        .run()
        .unwrap_err();

    match err {
        IngestError::Pool(PoolError::WorkerInit { message, .. }) => {
            assert!(message.contains("store unreachable"));
        },
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(service.journal.created(), 1);
    assert_eq!(service.journal.destroyed(), 1);
    assert_eq!(service.journal.events(), vec![Event::Destroy]);
}

#[test]
fn test_destroyed_handle_is_refused_by_workers() {
    let membership = single_node(GIB);
    let service = RecordingService::pre_destroyed();

    let err = IngestionDriver::new(scenario_config(), &membership, &service)
        .run()
        .unwrap_err();

    assert!(matches!(err, IngestError::Pool(PoolError::WorkerInit { .. })));
    assert_eq!(service.journal.destroyed(), 1);
    assert_eq!(service.journal.puts(), 0);
}

#[test]
fn test_empty_cluster_is_unavailable() {
    let membership = StaticMembership::default();
    let service = RecordingService::default();

    let err = IngestionDriver::new(scenario_config(), &membership, &service)
        .run()
        .unwrap_err();

    assert!(matches!(err, IngestError::ClusterUnavailable(_)));
    assert_eq!(service.journal.created(), 0);
}

#[test]
fn test_more_nodes_than_cluster_has() {
    let membership = single_node(GIB);
    let service = MemoryStoreService::new(1);
    let mut config = scenario_config();
    config.planner.node_count = Some(3);

    let err = IngestionDriver::new(config, &membership, &service)
        .run()
        .unwrap_err();

    assert!(matches!(err, IngestError::Config(_)));
}

#[test]
fn test_structured_record_round_trip() {
    let membership = single_node(GIB);
    let view = survey_cluster(&membership).unwrap();
    let mut config = scenario_config();
    config.payload = PayloadShape::Structured { entry_width: 16 };
    let budget = plan(&view, 1 << 20, &config.planner).unwrap();
    let store = MemoryStoreService::new(1).create(budget).unwrap();

    let ctx = WorkerContext::attach(store.clone()).unwrap();
    let item = WorkItem::new(4, 4096);
    let outcome = ctx.process(&item, &config.key_prefix, config.payload);
    assert!(outcome.is_success());

    let stored = store.get("some_key_4").unwrap().unwrap();
    let record: StructuredRecord = match stored {
        Record::Structured(record) => record,
        Record::Blob(_) => panic!("expected a structured record"),
    };

    assert_eq!(record.name, "record_4");
    assert_eq!(record.iteration, UNPROCESSED_ITERATION);
    assert_eq!(record.entries.len(), record.values.len());
    assert_eq!(record.entry_width(), Some(16));
    assert!(record.footprint_bytes() >= 4096);

    drop(ctx);
    store.destroy().unwrap();
}

#[test]
fn test_structured_payload_run() {
    let membership = single_node(GIB);
    let service = RecordingService::default();
    let mut config = scenario_config();
    config.item_mb = 0.05;
    config.payload = PayloadShape::Structured { entry_width: 32 };

    let report = IngestionDriver::new(config, &membership, &service)
        .run()
        .unwrap();

    assert_eq!(report.succeeded, 9);
    let stats = report.store_stats.unwrap();
    assert_eq!(stats.entries, 9);
    assert!(stats.bytes_used >= 9 * 52_428);
}

#[test]
fn test_report_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let membership = single_node(GIB);
    let service = RecordingService::failing(&["some_key_2"]);

    let report = IngestionDriver::new(scenario_config(), &membership, &service)
        .run()
        .unwrap();
    report.write_json(&path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["succeeded"], 8);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["failures"][0]["index"], 2);
    assert_eq!(json["failures"][0]["kind"], "backend");
}
