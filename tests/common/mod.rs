//! Common test utilities and helpers for integration tests.
#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use vanopticon_collab::sync::{
	AckPayload, CollabMessage, EventKind, Operation, OperationType, Payload, SyncEvent,
	SyncManager, create_operation_message, serialize_message,
};

pub const BOARD: &str = "board-1";

const ALL_KINDS: [EventKind; 9] = [
	EventKind::OperationSent,
	EventKind::OperationAcknowledged,
	EventKind::OperationFailed,
	EventKind::SyncStarted,
	EventKind::SyncCompleted,
	EventKind::ConflictDetected,
	EventKind::ConflictResolved,
	EventKind::ConnectionLost,
	EventKind::ConnectionRestored,
];

pub fn payload(value: Value) -> Payload {
	value.as_object().cloned().unwrap_or_default()
}

/// Build an operation as it would arrive from another client.
pub fn remote_op(
	id: &str,
	user_id: &str,
	element_id: &str,
	op_type: OperationType,
	timestamp: i64,
	version: u64,
	body: Value,
) -> Operation {
	Operation {
		id: id.to_string(),
		op_type,
		element_id: element_id.to_string(),
		user_id: user_id.to_string(),
		board_id: BOARD.to_string(),
		timestamp,
		version,
		payload: payload(body),
		parent_version: None,
	}
}

/// Records every event a manager emits, in emission order.
#[derive(Clone, Default)]
pub struct Recorder {
	events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl Recorder {
	pub fn attach(manager: &SyncManager) -> Self {
		let recorder = Self::default();
		for kind in ALL_KINDS {
			let events = Arc::clone(&recorder.events);
			let _ = manager.on(kind, move |e| events.lock().push(e.clone()));
		}
		recorder
	}

	pub fn events(&self) -> Vec<SyncEvent> {
		self.events.lock().clone()
	}

	pub fn kinds(&self) -> Vec<EventKind> {
		self.events.lock().iter().map(SyncEvent::kind).collect()
	}

	pub fn count(&self, kind: EventKind) -> usize {
		self.events.lock().iter().filter(|e| e.kind() == kind).count()
	}

	/// Batches announced through `operation_sent`, oldest first.
	pub fn sent(&self) -> Vec<Vec<Operation>> {
		self.events
			.lock()
			.iter()
			.filter_map(|e| match e {
				SyncEvent::OperationSent { operations } => Some(operations.clone()),
				_ => None,
			})
			.collect()
	}

	pub fn clear(&self) {
		self.events.lock().clear();
	}
}

/// In-memory stand-in for the server: sequences operations, acknowledges the
/// sender and fans the operation out to everyone else as wire JSON.
pub struct Relay {
	pub version: u64,
	pub log: Vec<Operation>,
}

/// Wire lines produced by the relay for one accepted batch.
pub struct Delivery {
	pub to_sender: Vec<String>,
	pub to_others: Vec<String>,
}

impl Relay {
	pub fn new() -> Self {
		Self {
			version: 0,
			log: Vec::new(),
		}
	}

	pub fn accept(&mut self, operations: &[Operation]) -> Delivery {
		let mut delivery = Delivery {
			to_sender: Vec::new(),
			to_others: Vec::new(),
		};
		for op in operations {
			self.version += 1;
			let sequenced = Operation {
				version: self.version,
				..op.clone()
			};
			self.log.push(sequenced.clone());

			let ack = CollabMessage::ack(
				"server",
				BOARD,
				AckPayload {
					operation_id: op.id.clone(),
					server_version: self.version,
					success: true,
					error: None,
				},
			);
			delivery.to_sender.push(serialize_message(&ack).unwrap());
			let relayed = create_operation_message(&op.user_id, BOARD, &sequenced);
			delivery.to_others.push(serialize_message(&relayed).unwrap());
		}
		delivery
	}

	/// Everything sequenced after `since`.
	pub fn sync_response(&self, since: u64) -> String {
		let operations = self.log.iter().filter(|op| op.version > since).cloned().collect();
		let response = CollabMessage::sync_response("server", BOARD, operations, self.version, None);
		serialize_message(&response).unwrap()
	}
}

/// Decode and hand every line to `manager`, collecting what must be applied.
pub fn deliver(manager: &SyncManager, lines: &[String]) -> Vec<Operation> {
	lines
		.iter()
		.filter_map(|line| vanopticon_collab::sync::deserialize_message(line))
		.flat_map(|message| manager.handle_message(&message))
		.collect()
}
