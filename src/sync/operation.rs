use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque per-key operation payload. The core only looks inside values for
/// the shallow merge rules; shape is owned by the calling application.
pub type Payload = Map<String, Value>;

/// Kind of edit an operation describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
	Create,
	Update,
	Delete,
	Move,
	Resize,
	Style,
	Lock,
	Unlock,
	Batch,
}

impl OperationType {
	pub fn as_str(&self) -> &'static str {
		match self {
			OperationType::Create => "create",
			OperationType::Update => "update",
			OperationType::Delete => "delete",
			OperationType::Move => "move",
			OperationType::Resize => "resize",
			OperationType::Style => "style",
			OperationType::Lock => "lock",
			OperationType::Unlock => "unlock",
			OperationType::Batch => "batch",
		}
	}
}

impl std::fmt::Display for OperationType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single edit to a single board element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
	/// Unique within a board's log
	pub id: String,
	#[serde(rename = "type")]
	pub op_type: OperationType,
	pub element_id: String,
	pub user_id: String,
	pub board_id: String,
	/// Unix epoch milliseconds
	pub timestamp: i64,
	/// Counter local to the originating client
	pub version: u64,
	#[serde(default)]
	pub payload: Payload,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub parent_version: Option<u64>,
}

impl Operation {
	pub fn is_delete(&self) -> bool {
		self.op_type == OperationType::Delete
	}

	/// Ordering key used when two timestamps compare equal.
	pub(crate) fn tie_break_key(&self) -> (&str, u64, &str) {
		(self.user_id.as_str(), self.version, self.id.as_str())
	}
}

/// Generate a collision-resistant identifier: the current time in
/// milliseconds followed by a random suffix.
pub fn generate_id() -> String {
	let random = Uuid::new_v4().simple().to_string();
	format!("{}-{}", now_millis(), &random[..12])
}

pub(crate) fn now_millis() -> i64 {
	Utc::now().timestamp_millis()
}

/// A partially filled operation as produced by local edit handlers. The sync
/// manager stamps id, timestamp, version, user and board when it is added.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
	pub op_type: OperationType,
	pub element_id: String,
	pub payload: Payload,
	pub parent_version: Option<u64>,
}

impl NewOperation {
	pub fn new(op_type: OperationType, element_id: impl Into<String>, payload: Payload) -> Self {
		Self {
			op_type,
			element_id: element_id.into(),
			payload,
			parent_version: None,
		}
	}

	pub fn create(element_id: impl Into<String>, payload: Payload) -> Self {
		Self::new(OperationType::Create, element_id, payload)
	}

	pub fn update(element_id: impl Into<String>, payload: Payload) -> Self {
		Self::new(OperationType::Update, element_id, payload)
	}

	pub fn delete(element_id: impl Into<String>) -> Self {
		Self::new(OperationType::Delete, element_id, Payload::new())
	}

	/// Reposition an element. Carries only `x` and `y`.
	pub fn move_to(element_id: impl Into<String>, x: f64, y: f64) -> Self {
		let mut payload = Payload::new();
		payload.insert("x".to_string(), Value::from(x));
		payload.insert("y".to_string(), Value::from(y));
		Self::new(OperationType::Move, element_id, payload)
	}

	/// Resize an element. Carries only `width` and `height`.
	pub fn resize(element_id: impl Into<String>, width: f64, height: f64) -> Self {
		let mut payload = Payload::new();
		payload.insert("width".to_string(), Value::from(width));
		payload.insert("height".to_string(), Value::from(height));
		Self::new(OperationType::Resize, element_id, payload)
	}

	pub fn style(element_id: impl Into<String>, styles: Payload) -> Self {
		Self::new(OperationType::Style, element_id, styles)
	}

	pub fn lock(element_id: impl Into<String>) -> Self {
		Self::new(OperationType::Lock, element_id, Payload::new())
	}

	pub fn unlock(element_id: impl Into<String>) -> Self {
		Self::new(OperationType::Unlock, element_id, Payload::new())
	}

	/// Group several already-stamped operations under one element id.
	pub fn batch(element_id: impl Into<String>, operations: &[Operation]) -> Self {
		let mut payload = Payload::new();
		let ops = operations
			.iter()
			.filter_map(|op| serde_json::to_value(op).ok())
			.collect::<Vec<_>>();
		payload.insert("operations".to_string(), Value::Array(ops));
		Self::new(OperationType::Batch, element_id, payload)
	}

	pub fn with_parent_version(mut self, parent_version: u64) -> Self {
		self.parent_version = Some(parent_version);
		self
	}

	/// Stamp the remaining fields and produce a full operation.
	pub fn stamp(self, user_id: &str, board_id: &str, version: u64) -> Operation {
		Operation {
			id: generate_id(),
			op_type: self.op_type,
			element_id: self.element_id,
			user_id: user_id.to_string(),
			board_id: board_id.to_string(),
			timestamp: now_millis(),
			version,
			payload: self.payload,
			parent_version: self.parent_version,
		}
	}
}
