/// Walk-through of conflict resolution between two canvas clients.
///
/// Run with: cargo run --example conflict_resolution_demo
use serde_json::json;
use vanopticon_collab::sync::{
	ConflictResolver, EventKind, NewOperation, Operation, OperationType, ResolutionStrategy,
	SyncEvent, SyncManager,
};

fn main() {
	println!("=== Collab Conflict Resolution Demo ===\n");

	println!("Example 1: Concurrent Style Updates");
	println!("-----------------------------------");
	demo_strategies();
	println!();

	println!("Example 2: Delete Wins Under Merge");
	println!("----------------------------------");
	demo_delete();
	println!();

	println!("Example 3: Session Reconciliation");
	println!("---------------------------------");
	demo_session();
	println!();

	println!("=== Demo Complete ===");
}

fn operation(id: &str, user: &str, op_type: OperationType, timestamp: i64, payload: serde_json::Value) -> Operation {
	Operation {
		id: id.to_string(),
		op_type,
		element_id: "sticky-7".to_string(),
		user_id: user.to_string(),
		board_id: "retro".to_string(),
		timestamp,
		version: 1,
		payload: payload.as_object().cloned().unwrap_or_default(),
		parent_version: None,
	}
}

fn demo_strategies() {
	let alice = operation("a1", "alice", OperationType::Update, 1_700_000_000_000, json!({"color": "yellow", "text": "ship it"}));
	let bob = operation("b1", "bob", OperationType::Update, 1_700_000_001_000, json!({"color": "pink"}));

	println!("alice (local, earlier):  {}", serde_json::Value::Object(alice.payload.clone()));
	println!("bob   (remote, later):   {}", serde_json::Value::Object(bob.payload.clone()));

	for strategy in ResolutionStrategy::ALL {
		let resolution = ConflictResolver::new(strategy).resolve(&alice, &bob);
		println!(
			"  {:<16} → {} {}",
			strategy.as_str(),
			resolution.winning_operation.id,
			serde_json::Value::Object(resolution.winning_operation.payload)
		);
	}
}

fn demo_delete() {
	let resolver = ConflictResolver::default();
	let delete = operation("a2", "alice", OperationType::Delete, 1_700_000_000_000, json!({}));
	let moved = operation("b2", "bob", OperationType::Move, 1_700_000_005_000, json!({"x": 40, "y": 12}));

	let resolution = resolver.resolve(&moved, &delete);
	println!("bob moves the note after alice deleted it");
	println!("  winner: {} ({})", resolution.winning_operation.id, resolution.winning_operation.op_type);
	println!("  → the delete is terminal even though it is older");
}

fn demo_session() {
	let manager = SyncManager::new("alice", "retro");
	let _ = manager.on(EventKind::ConflictResolved, |event| {
		if let SyncEvent::ConflictResolved { resolution, .. } = event {
			println!("  [event] conflict resolved in favor of {}", resolution.winning_operation.id);
		}
	});

	let local = manager.add_operation(NewOperation::move_to("sticky-7", 10.0, 10.0));
	let sent = manager.flush_operations();
	println!("alice sent {} operation(s); pending: {}", sent.len(), manager.pending_operations().len());

	let remote = operation("b3", "bob", OperationType::Resize, local.timestamp + 20, json!({"width": 200, "height": 120}));
	let applied = manager.receive_remote_operation(remote);
	println!(
		"bob resized concurrently; apply {} {}",
		applied.op_type,
		serde_json::Value::Object(applied.payload)
	);

	manager.acknowledge_operation(&local.id, 12);
	let state = manager.state();
	println!("after ack: pending {}, server v{}", state.pending_operations.len(), state.server_version);
}
