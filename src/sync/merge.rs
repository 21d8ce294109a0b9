use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;
use thiserror::Error;

use crate::sync::operation::{Operation, OperationType, Payload};

/// Policy for picking a winner between two conflicting operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
	/// The strictly later timestamp wins.
	LastWriteWins,
	/// The strictly earlier timestamp wins.
	FirstWriteWins,
	/// The remote (server-relayed) operation always wins.
	ServerPriority,
	/// The local operation always wins.
	ClientPriority,
	/// Field and type aware merge, falling back to last-write-wins.
	#[default]
	Merge,
}

impl ResolutionStrategy {
	pub const ALL: [ResolutionStrategy; 5] = [
		ResolutionStrategy::LastWriteWins,
		ResolutionStrategy::FirstWriteWins,
		ResolutionStrategy::ServerPriority,
		ResolutionStrategy::ClientPriority,
		ResolutionStrategy::Merge,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			ResolutionStrategy::LastWriteWins => "last_write_wins",
			ResolutionStrategy::FirstWriteWins => "first_write_wins",
			ResolutionStrategy::ServerPriority => "server_priority",
			ResolutionStrategy::ClientPriority => "client_priority",
			ResolutionStrategy::Merge => "merge",
		}
	}
}

impl std::fmt::Display for ResolutionStrategy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resolution strategy '{0}' (expected one of last_write_wins, first_write_wins, server_priority, client_priority, merge)")]
pub struct ParseStrategyError(pub String);

impl FromStr for ResolutionStrategy {
	type Err = ParseStrategyError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
		ResolutionStrategy::ALL
			.into_iter()
			.find(|strategy| strategy.as_str() == normalized)
			.ok_or_else(|| ParseStrategyError(s.to_string()))
	}
}

/// Outcome of resolving two operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
	pub resolved: bool,
	/// The operation to apply. May be synthesized rather than either input.
	pub winning_operation: Operation,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub merged_payload: Option<Payload>,
	#[serde(default)]
	pub discarded_operations: Vec<Operation>,
}

impl Resolution {
	fn winner(winner: &Operation, loser: &Operation) -> Self {
		Self {
			resolved: true,
			winning_operation: winner.clone(),
			merged_payload: None,
			discarded_operations: vec![loser.clone()],
		}
	}

	fn independent(local: &Operation) -> Self {
		Self {
			resolved: true,
			winning_operation: local.clone(),
			merged_payload: None,
			discarded_operations: Vec::new(),
		}
	}

	fn merged(operation: Operation) -> Self {
		Self {
			resolved: true,
			merged_payload: Some(operation.payload.clone()),
			winning_operation: operation,
			discarded_operations: Vec::new(),
		}
	}

	/// True when `operation` lost and must not be applied or retransmitted.
	pub fn discards(&self, operation: &Operation) -> bool {
		self.discarded_operations.iter().any(|d| d.id == operation.id)
	}
}

/// Resolves conflicts between a local and a remote operation. Pure: no I/O,
/// inputs are never mutated, and the same inputs always give the same result.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
	strategy: ResolutionStrategy,
}

impl ConflictResolver {
	pub fn new(strategy: ResolutionStrategy) -> Self {
		Self { strategy }
	}

	pub fn strategy(&self) -> ResolutionStrategy {
		self.strategy
	}

	pub fn set_strategy(&mut self, strategy: ResolutionStrategy) {
		self.strategy = strategy;
	}

	pub fn resolve(&self, local: &Operation, remote: &Operation) -> Resolution {
		// Different elements never conflict; both apply independently.
		if local.element_id != remote.element_id {
			return Resolution::independent(local);
		}

		// Same author: an echo or retry of an earlier op.
		if local.user_id == remote.user_id {
			return if is_later(remote, local) {
				Resolution::winner(remote, local)
			} else {
				Resolution::winner(local, remote)
			};
		}

		match self.strategy {
			ResolutionStrategy::LastWriteWins => self.resolve_lww(local, remote),
			ResolutionStrategy::FirstWriteWins => self.resolve_fww(local, remote),
			ResolutionStrategy::ServerPriority => Resolution::winner(remote, local),
			ResolutionStrategy::ClientPriority => Resolution::winner(local, remote),
			ResolutionStrategy::Merge => self.resolve_merge(local, remote),
		}
	}

	fn resolve_lww(&self, local: &Operation, remote: &Operation) -> Resolution {
		if is_later(remote, local) {
			Resolution::winner(remote, local)
		} else {
			Resolution::winner(local, remote)
		}
	}

	fn resolve_fww(&self, local: &Operation, remote: &Operation) -> Resolution {
		if is_later(local, remote) {
			Resolution::winner(remote, local)
		} else {
			Resolution::winner(local, remote)
		}
	}

	fn resolve_merge(&self, local: &Operation, remote: &Operation) -> Resolution {
		use OperationType::*;

		// Deletes are terminal.
		match (local.is_delete(), remote.is_delete()) {
			(true, false) => return Resolution::winner(local, remote),
			(false, true) => return Resolution::winner(remote, local),
			(true, true) => return self.resolve_lww(local, remote),
			(false, false) => {}
		}

		match (local.op_type, remote.op_type) {
			(Update, Update) => {
				let payload = merge_payloads(&local.payload, &remote.payload);
				Resolution::merged(synthesize_update(local, remote, payload))
			}
			(Move, Resize) | (Resize, Move) => {
				// Position and size keys are disjoint; a plain union suffices.
				let mut payload = local.payload.clone();
				payload.extend(remote.payload.iter().map(|(k, v)| (k.clone(), v.clone())));
				Resolution::merged(synthesize_update(local, remote, payload))
			}
			_ => self.resolve_lww(local, remote),
		}
	}
}

/// Whether `a` is the later write. Equal timestamps fall back to a stable
/// ordering on author, version and id so that both argument orders agree.
fn is_later(a: &Operation, b: &Operation) -> bool {
	match a.timestamp.cmp(&b.timestamp) {
		Ordering::Greater => true,
		Ordering::Less => false,
		Ordering::Equal => a.tie_break_key() > b.tie_break_key(),
	}
}

/// Key-wise union of two payloads with remote values taking precedence.
/// When both sides hold an object under the same key, the objects are
/// merged one level deep instead of replaced.
pub fn merge_payloads(local: &Payload, remote: &Payload) -> Payload {
	let mut merged = local.clone();
	for (key, remote_value) in remote {
		let value = match (merged.get(key), remote_value) {
			(Some(Value::Object(local_nested)), Value::Object(remote_nested)) => {
				let mut nested = local_nested.clone();
				for (k, v) in remote_nested {
					nested.insert(k.clone(), v.clone());
				}
				Value::Object(nested)
			}
			_ => remote_value.clone(),
		};
		merged.insert(key.clone(), value);
	}
	merged
}

fn synthesize_update(local: &Operation, remote: &Operation, payload: Payload) -> Operation {
	Operation {
		op_type: OperationType::Update,
		timestamp: local.timestamp.max(remote.timestamp),
		payload,
		..remote.clone()
	}
}
