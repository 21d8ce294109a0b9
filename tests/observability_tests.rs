use std::sync::Arc;
use vanopticon_collab::observability::{MetricsRegistry, init_metrics};
use vanopticon_collab::sync::{NewOperation, Operation, OperationType, SyncManager, SyncOptions};

fn manager_with_metrics() -> (SyncManager, Arc<MetricsRegistry>) {
	let metrics = init_metrics().expect("metrics registry should build");
	let manager = SyncManager::with_options(
		"alice",
		"board-1",
		SyncOptions::default().with_metrics(Arc::clone(&metrics)),
	);
	(manager, metrics)
}

#[cfg(feature = "integration-tests")]
#[test]
fn test_metrics_registry_exposes_all_series() {
	let registry = MetricsRegistry::new().expect("metrics registry should build");
	let output = registry.encode();

	for series in [
		"collab_operations_buffered_total",
		"collab_flushes_total",
		"collab_operations_sent_total",
		"collab_flush_batch_size",
		"collab_operations_acknowledged_total",
		"collab_operations_failed_total",
		"collab_pending_operations",
		"collab_remote_operations_total",
		"collab_conflicts_total",
		"collab_resyncs_total",
	] {
		assert!(output.contains(series), "missing {}", series);
	}
}

#[cfg(feature = "integration-tests")]
#[test]
fn test_session_lifecycle_is_counted() {
	let (manager, metrics) = manager_with_metrics();

	let first = manager.add_operation(NewOperation::move_to("e1", 1.0, 1.0));
	manager.add_operation(NewOperation::move_to("e1", 2.0, 2.0));
	manager.add_operation(NewOperation::lock("e2"));
	manager.flush_operations();

	assert_eq!(metrics.operations_buffered_total.get(), 3);
	assert_eq!(metrics.flushes_total.get(), 1);
	assert_eq!(metrics.operations_sent_total.get(), 2);
	assert_eq!(metrics.pending_operations.get(), 2);
	assert_eq!(metrics.flush_batch_size.get_sample_count(), 1);
	assert_eq!(metrics.flush_batch_size.get_sample_sum(), 3.0);

	let pending = manager.pending_operations();
	manager.acknowledge_operation(&pending[0].id, 5);
	manager.acknowledge_operation(&pending[0].id, 5);
	assert_eq!(metrics.operations_acknowledged_total.get(), 1);
	assert_eq!(metrics.pending_operations.get(), 1);

	// The coalesced op carries the last edit's id, not the first.
	assert_ne!(pending[0].id, first.id);

	let remote = Operation {
		id: "r1".to_string(),
		op_type: OperationType::Unlock,
		element_id: "e2".to_string(),
		user_id: "bob".to_string(),
		board_id: "board-1".to_string(),
		timestamp: pending[1].timestamp + 10,
		version: 6,
		payload: Default::default(),
		parent_version: None,
	};
	manager.receive_remote_operation(remote);
	assert_eq!(metrics.remote_operations_total.get(), 1);
	assert_eq!(metrics.conflicts_total.get(), 1);
	// Unlock after lock: last write wins and the local lock is dropped.
	assert_eq!(metrics.pending_operations.get(), 0);

	manager.set_online_status(false);
	manager.set_online_status(true);
	assert_eq!(metrics.resyncs_total.get(), 1);

	let output = metrics.encode();
	assert!(output.contains("collab_conflicts_total 1"));
	assert!(output.contains("collab_resyncs_total 1"));
}
