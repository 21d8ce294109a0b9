use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::sync::merge::Resolution;
use crate::sync::operation::{Operation, generate_id, now_millis};

/// Errors raised while encoding messages for the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("failed to encode message: {0}")]
	Encode(#[from] serde_json::Error),
}

/// Common header shared by every message variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
	pub message_id: String,
	pub user_id: String,
	pub board_id: String,
	/// Unix epoch milliseconds
	pub timestamp: i64,
	pub payload: T,
}

impl<T> Envelope<T> {
	/// Wrap `payload`, stamping a fresh message id and the current time.
	pub fn new(user_id: impl Into<String>, board_id: impl Into<String>, payload: T) -> Self {
		Self {
			message_id: generate_id(),
			user_id: user_id.into(),
			board_id: board_id.into(),
			timestamp: now_millis(),
			payload,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
	pub operation_id: String,
	pub server_version: u64,
	pub success: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequestPayload {
	pub last_known_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponsePayload {
	pub operations: Vec<Operation>,
	pub current_version: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub full_state: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
	Online,
	Away,
	Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
	pub x: f64,
	pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
	pub status: PresenceStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cursor: Option<CursorPosition>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub selection: Option<Vec<String>>,
	pub color: String,
	pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionPayload {
	pub element_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictPayload {
	pub local_operation: Operation,
	pub server_operation: Operation,
	pub resolution: Resolution,
}

/// The server rejected a previously sent operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPayload {
	pub operation_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

/// Wire message. Serializes as `{type, messageId, userId, boardId,
/// timestamp, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollabMessage {
	Operation(Envelope<Operation>),
	Ack(Envelope<AckPayload>),
	SyncRequest(Envelope<SyncRequestPayload>),
	SyncResponse(Envelope<SyncResponsePayload>),
	PresenceUpdate(Envelope<PresencePayload>),
	CursorMove(Envelope<CursorPosition>),
	SelectionChange(Envelope<SelectionPayload>),
	Conflict(Envelope<ConflictPayload>),
	Rollback(Envelope<RollbackPayload>),
}

/// Discriminant of [`CollabMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
	Operation,
	Ack,
	SyncRequest,
	SyncResponse,
	PresenceUpdate,
	CursorMove,
	SelectionChange,
	Conflict,
	Rollback,
}

macro_rules! with_envelope {
	($msg:expr, $env:ident => $body:expr) => {
		match $msg {
			CollabMessage::Operation($env) => $body,
			CollabMessage::Ack($env) => $body,
			CollabMessage::SyncRequest($env) => $body,
			CollabMessage::SyncResponse($env) => $body,
			CollabMessage::PresenceUpdate($env) => $body,
			CollabMessage::CursorMove($env) => $body,
			CollabMessage::SelectionChange($env) => $body,
			CollabMessage::Conflict($env) => $body,
			CollabMessage::Rollback($env) => $body,
		}
	};
}

impl CollabMessage {
	pub fn kind(&self) -> MessageKind {
		match self {
			CollabMessage::Operation(_) => MessageKind::Operation,
			CollabMessage::Ack(_) => MessageKind::Ack,
			CollabMessage::SyncRequest(_) => MessageKind::SyncRequest,
			CollabMessage::SyncResponse(_) => MessageKind::SyncResponse,
			CollabMessage::PresenceUpdate(_) => MessageKind::PresenceUpdate,
			CollabMessage::CursorMove(_) => MessageKind::CursorMove,
			CollabMessage::SelectionChange(_) => MessageKind::SelectionChange,
			CollabMessage::Conflict(_) => MessageKind::Conflict,
			CollabMessage::Rollback(_) => MessageKind::Rollback,
		}
	}

	pub fn message_id(&self) -> &str {
		with_envelope!(self, env => env.message_id.as_str())
	}

	pub fn user_id(&self) -> &str {
		with_envelope!(self, env => env.user_id.as_str())
	}

	pub fn board_id(&self) -> &str {
		with_envelope!(self, env => env.board_id.as_str())
	}

	pub fn timestamp(&self) -> i64 {
		with_envelope!(self, env => env.timestamp)
	}

	/// Presence-style traffic carries no element-keyed operation and never
	/// enters conflict resolution.
	pub fn is_presence(&self) -> bool {
		matches!(
			self,
			CollabMessage::PresenceUpdate(_)
				| CollabMessage::CursorMove(_)
				| CollabMessage::SelectionChange(_)
		)
	}

	pub fn ack(user_id: &str, board_id: &str, payload: AckPayload) -> Self {
		CollabMessage::Ack(Envelope::new(user_id, board_id, payload))
	}

	pub fn sync_request(user_id: &str, board_id: &str, last_known_version: u64) -> Self {
		CollabMessage::SyncRequest(Envelope::new(
			user_id,
			board_id,
			SyncRequestPayload { last_known_version },
		))
	}

	pub fn sync_response(
		user_id: &str,
		board_id: &str,
		operations: Vec<Operation>,
		current_version: u64,
		full_state: Option<Value>,
	) -> Self {
		CollabMessage::SyncResponse(Envelope::new(
			user_id,
			board_id,
			SyncResponsePayload {
				operations,
				current_version,
				full_state,
			},
		))
	}

	pub fn presence_update(user_id: &str, board_id: &str, payload: PresencePayload) -> Self {
		CollabMessage::PresenceUpdate(Envelope::new(user_id, board_id, payload))
	}

	pub fn cursor_move(user_id: &str, board_id: &str, x: f64, y: f64) -> Self {
		CollabMessage::CursorMove(Envelope::new(user_id, board_id, CursorPosition { x, y }))
	}

	pub fn selection_change(user_id: &str, board_id: &str, element_ids: Vec<String>) -> Self {
		CollabMessage::SelectionChange(Envelope::new(
			user_id,
			board_id,
			SelectionPayload { element_ids },
		))
	}

	pub fn conflict(user_id: &str, board_id: &str, payload: ConflictPayload) -> Self {
		CollabMessage::Conflict(Envelope::new(user_id, board_id, payload))
	}

	pub fn rollback(
		user_id: &str,
		board_id: &str,
		operation_id: impl Into<String>,
		reason: Option<String>,
	) -> Self {
		CollabMessage::Rollback(Envelope::new(
			user_id,
			board_id,
			RollbackPayload {
				operation_id: operation_id.into(),
				reason,
			},
		))
	}
}

/// Build an `operation` message for `operation`. The operation is cloned;
/// the caller's copy is left untouched.
pub fn create_operation_message(user_id: &str, board_id: &str, operation: &Operation) -> CollabMessage {
	CollabMessage::Operation(Envelope::new(user_id, board_id, operation.clone()))
}

pub fn serialize_message(message: &CollabMessage) -> Result<String, ProtocolError> {
	Ok(serde_json::to_string(message)?)
}

/// Decode a wire message. Malformed input yields `None`; callers are expected
/// to log and drop rather than treat it as fatal.
pub fn deserialize_message(data: &str) -> Option<CollabMessage> {
	match serde_json::from_str::<CollabMessage>(data) {
		Ok(message) => Some(message),
		Err(e) => {
			debug!("Discarding undecodable message ({} bytes): {}", data.len(), e);
			None
		}
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::sync::operation::NewOperation;

	fn sample_operation() -> Operation {
		let mut payload = crate::sync::operation::Payload::new();
		payload.insert("color".to_string(), json!("red"));
		NewOperation::update("shape-1", payload).stamp("alice", "board-1", 1)
	}

	#[test]
	fn test_create_operation_message_stamps_header() {
		let op = sample_operation();
		let before = op.clone();
		let msg = create_operation_message("alice", "board-1", &op);

		assert_eq!(op, before);
		assert_eq!(msg.kind(), MessageKind::Operation);
		assert_eq!(msg.user_id(), "alice");
		assert_eq!(msg.board_id(), "board-1");
		assert!(!msg.message_id().is_empty());
		assert_ne!(msg.message_id(), op.id);
		assert!(msg.timestamp() >= op.timestamp);
	}

	#[test]
	fn test_wire_shape() {
		let msg = CollabMessage::ack(
			"server",
			"board-1",
			AckPayload {
				operation_id: "op-1".to_string(),
				server_version: 12,
				success: true,
				error: None,
			},
		);
		let value: Value = serde_json::from_str(&serialize_message(&msg).unwrap()).unwrap();

		assert_eq!(value["type"], "ack");
		assert_eq!(value["userId"], "server");
		assert_eq!(value["boardId"], "board-1");
		assert!(value["messageId"].is_string());
		assert!(value["timestamp"].is_i64());
		assert_eq!(value["payload"]["operationId"], "op-1");
		assert_eq!(value["payload"]["serverVersion"], 12);
		assert!(value["payload"].get("error").is_none());
	}

	#[test]
	fn test_deserialize_sync_response_from_wire() {
		let raw = json!({
			"type": "sync_response",
			"messageId": "m-1",
			"userId": "server",
			"boardId": "board-1",
			"timestamp": 5000,
			"payload": {
				"currentVersion": 42,
				"operations": [{
					"id": "op-9",
					"type": "resize",
					"elementId": "shape-1",
					"userId": "bob",
					"boardId": "board-1",
					"timestamp": 4000,
					"version": 3,
					"payload": {"width": 10, "height": 20}
				}]
			}
		})
		.to_string();

		match deserialize_message(&raw) {
			Some(CollabMessage::SyncResponse(env)) => {
				assert_eq!(env.payload.current_version, 42);
				assert_eq!(env.payload.operations.len(), 1);
				assert_eq!(env.payload.operations[0].payload["width"], 10);
				assert!(env.payload.full_state.is_none());
			}
			other => panic!("unexpected message: {:?}", other),
		}
	}

	#[test]
	fn test_deserialize_garbage_returns_none() {
		assert!(deserialize_message("").is_none());
		assert!(deserialize_message("{not json").is_none());
		assert!(deserialize_message(r#"{"type":"teleport","payload":{}}"#).is_none());
		assert!(deserialize_message(r#"{"type":"ack","messageId":"m","userId":"u","boardId":"b","timestamp":1,"payload":{}}"#).is_none());
	}

	#[test]
	fn test_presence_messages_are_flagged() {
		let cursor = CollabMessage::cursor_move("alice", "b1", 1.0, 2.0);
		let selection = CollabMessage::selection_change("alice", "b1", vec!["e1".to_string()]);
		let presence = CollabMessage::presence_update(
			"alice",
			"b1",
			PresencePayload {
				status: PresenceStatus::Away,
				cursor: None,
				selection: None,
				color: "#ff0000".to_string(),
				name: "Alice".to_string(),
			},
		);

		assert!(cursor.is_presence());
		assert!(selection.is_presence());
		assert!(presence.is_presence());
		assert!(!CollabMessage::sync_request("alice", "b1", 0).is_presence());

		let text = serialize_message(&presence).unwrap();
		assert!(text.contains(r#""type":"presence_update""#));
		assert!(text.contains(r#""status":"away""#));
	}
}
