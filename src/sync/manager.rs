use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::observability::MetricsRegistry;
use crate::sync::events::{EventBus, EventKind, Subscription, SyncEvent};
use crate::sync::merge::{ConflictResolver, ResolutionStrategy};
use crate::sync::message::CollabMessage;
use crate::sync::operation::{NewOperation, Operation, now_millis};

/// Delay between the last local edit and the flush that sends it.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(50);
/// Buffer size of the broadcast event mirror.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Synchronization bookkeeping for one board session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
	pub local_version: u64,
	pub server_version: u64,
	/// Sent but not yet acknowledged, in send order
	pub pending_operations: Vec<Operation>,
	/// Every id acknowledged this session. Grows with the session and is
	/// only cleared by `reset`; it is what keeps repeated acks silent.
	pub acknowledged_operations: HashSet<String>,
	/// Unix epoch milliseconds of the last completed resync
	pub last_sync_time: Option<i64>,
	pub is_online: bool,
}

impl Default for SyncState {
	fn default() -> Self {
		Self {
			local_version: 0,
			server_version: 0,
			pending_operations: Vec::new(),
			acknowledged_operations: HashSet::new(),
			last_sync_time: None,
			is_online: true,
		}
	}
}

/// Tunables for a [`SyncManager`].
#[derive(Clone)]
pub struct SyncOptions {
	pub flush_delay: Duration,
	pub strategy: ResolutionStrategy,
	pub event_capacity: usize,
	pub metrics: Option<Arc<MetricsRegistry>>,
}

impl Default for SyncOptions {
	fn default() -> Self {
		Self {
			flush_delay: DEFAULT_FLUSH_DELAY,
			strategy: ResolutionStrategy::default(),
			event_capacity: DEFAULT_EVENT_CAPACITY,
			metrics: None,
		}
	}
}

impl SyncOptions {
	pub fn from_settings(settings: &Settings) -> Self {
		Self {
			flush_delay: Duration::from_millis(settings.flush_delay_ms),
			strategy: settings.strategy,
			event_capacity: settings.event_capacity,
			metrics: None,
		}
	}

	pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
		self.metrics = Some(metrics);
		self
	}
}

struct Inner {
	user_id: String,
	board_id: String,
	state: SyncState,
	/// Local edits waiting for the debounce timer; distinct from pending.
	buffer: Vec<Operation>,
	flush_task: Option<JoinHandle<()>>,
	resolver: ConflictResolver,
}

struct Shared {
	inner: Mutex<Inner>,
	events: EventBus,
	metrics: Option<Arc<MetricsRegistry>>,
	runtime: Option<Handle>,
	flush_delay: Duration,
}

/// Client-side orchestrator for one board session.
///
/// Cloning yields another handle to the same session. The manager performs
/// no I/O: outbound traffic is announced through `operation_sent` and
/// `sync_started` events and returned envelopes, and inbound traffic is fed
/// in by the transport adapter. Events are emitted after the internal lock
/// is released, so listeners may call back into the manager.
#[derive(Clone)]
pub struct SyncManager {
	shared: Arc<Shared>,
}

impl SyncManager {
	pub fn new(user_id: impl Into<String>, board_id: impl Into<String>) -> Self {
		Self::with_options(user_id, board_id, SyncOptions::default())
	}

	/// Build a manager. If called inside a tokio runtime, the debounce timer
	/// runs on it; otherwise buffered edits wait for an explicit
	/// [`SyncManager::flush_operations`].
	pub fn with_options(
		user_id: impl Into<String>,
		board_id: impl Into<String>,
		options: SyncOptions,
	) -> Self {
		let runtime = Handle::try_current().ok();
		if runtime.is_none() {
			debug!("No tokio runtime available; debounced flushing disabled");
		}

		Self {
			shared: Arc::new(Shared {
				inner: Mutex::new(Inner {
					user_id: user_id.into(),
					board_id: board_id.into(),
					state: SyncState::default(),
					buffer: Vec::new(),
					flush_task: None,
					resolver: ConflictResolver::new(options.strategy),
				}),
				events: EventBus::new(options.event_capacity),
				metrics: options.metrics,
				runtime,
				flush_delay: options.flush_delay,
			}),
		}
	}

	pub fn from_settings(settings: &Settings, board_id: impl Into<String>) -> Self {
		Self::with_options(
			settings.user_id.clone(),
			board_id,
			SyncOptions::from_settings(settings),
		)
	}

	pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
	where
		F: Fn(&SyncEvent) + Send + Sync + 'static,
	{
		self.shared.events.on(kind, callback)
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
		self.shared.events.subscribe()
	}

	pub fn user_id(&self) -> String {
		self.shared.inner.lock().user_id.clone()
	}

	pub fn board_id(&self) -> String {
		self.shared.inner.lock().board_id.clone()
	}

	pub fn state(&self) -> SyncState {
		self.shared.inner.lock().state.clone()
	}

	pub fn pending_operations(&self) -> Vec<Operation> {
		self.shared.inner.lock().state.pending_operations.clone()
	}

	pub fn buffered_count(&self) -> usize {
		self.shared.inner.lock().buffer.len()
	}

	pub fn is_online(&self) -> bool {
		self.shared.inner.lock().state.is_online
	}

	pub fn strategy(&self) -> ResolutionStrategy {
		self.shared.inner.lock().resolver.strategy()
	}

	pub fn set_strategy(&self, strategy: ResolutionStrategy) {
		self.shared.inner.lock().resolver.set_strategy(strategy);
		info!("Conflict resolution strategy set to {}", strategy);
	}

	/// Stamp a local edit and queue it for the next debounced flush.
	/// Returns the stamped operation so the caller can apply it right away.
	pub fn add_operation(&self, new_operation: NewOperation) -> Operation {
		let (operation, buffered) = {
			let mut inner = self.shared.inner.lock();
			inner.state.local_version += 1;
			let operation =
				new_operation.stamp(&inner.user_id, &inner.board_id, inner.state.local_version);
			inner.buffer.push(operation.clone());
			self.schedule_flush(&mut inner);
			(operation, inner.buffer.len())
		};

		if let Some(m) = &self.shared.metrics {
			m.operations_buffered_total.inc();
		}
		debug!(
			"Buffered {} on {} (v{}), buffer size: {}",
			operation.op_type, operation.element_id, operation.version, buffered
		);

		operation
	}

	/// Restart the debounce timer.
	fn schedule_flush(&self, inner: &mut Inner) {
		if let Some(task) = inner.flush_task.take() {
			task.abort();
		}
		let Some(runtime) = &self.shared.runtime else {
			return;
		};

		let weak = Arc::downgrade(&self.shared);
		let delay = self.shared.flush_delay;
		inner.flush_task = Some(runtime.spawn(async move {
			tokio::time::sleep(delay).await;
			if let Some(shared) = weak.upgrade() {
				SyncManager { shared }.flush(Some(tokio::task::id()));
			}
		}));
	}

	/// Drain the buffer, coalesce per element, move the result to pending and
	/// emit `operation_sent`. Returns the coalesced operations.
	pub fn flush_operations(&self) -> Vec<Operation> {
		self.flush(None)
	}

	/// `timer` is the id of the debounce task doing the flush, if any. A timer
	/// only clears its own handle: an edit may have scheduled a newer one
	/// between its wake-up and this lock.
	fn flush(&self, timer: Option<tokio::task::Id>) -> Vec<Operation> {
		let (merged, drained, pending) = {
			let mut inner = self.shared.inner.lock();
			match timer {
				None => {
					if let Some(task) = inner.flush_task.take() {
						task.abort();
					}
				}
				Some(id) => {
					if inner.flush_task.as_ref().is_some_and(|task| task.id() == id) {
						inner.flush_task = None;
					}
				}
			}
			if inner.buffer.is_empty() {
				return Vec::new();
			}

			let buffer = std::mem::take(&mut inner.buffer);
			let drained = buffer.len();
			let merged = coalesce(buffer);
			inner.state.pending_operations.extend(merged.iter().cloned());
			(merged, drained, inner.state.pending_operations.len())
		};

		if let Some(m) = &self.shared.metrics {
			m.flushes_total.inc();
			m.flush_batch_size.observe(drained as f64);
			m.operations_sent_total.inc_by(merged.len() as u64);
			m.pending_operations.set(pending as i64);
		}
		debug!(
			"Flushed {} buffered operations as {} ({} pending)",
			drained,
			merged.len(),
			pending
		);

		self.shared.events.emit(SyncEvent::OperationSent {
			operations: merged.clone(),
		});
		merged
	}

	/// Record a server acknowledgment. Repeated acks for the same id are
	/// harmless.
	pub fn acknowledge_operation(&self, operation_id: &str, server_version: u64) {
		let (first_ack, pending) = {
			let mut inner = self.shared.inner.lock();
			let first_ack = inner
				.state
				.acknowledged_operations
				.insert(operation_id.to_string());
			inner.state.server_version = inner.state.server_version.max(server_version);
			inner
				.state
				.pending_operations
				.retain(|op| op.id != operation_id);
			(first_ack, inner.state.pending_operations.len())
		};

		if let Some(m) = &self.shared.metrics {
			m.pending_operations.set(pending as i64);
			if first_ack {
				m.operations_acknowledged_total.inc();
			}
		}

		if first_ack {
			debug!("Operation {} acknowledged at server v{}", operation_id, server_version);
			self.shared.events.emit(SyncEvent::OperationAcknowledged {
				operation_id: operation_id.to_string(),
				server_version,
			});
		}
	}

	/// Reconcile a remote operation with pending local work and return the
	/// operation the caller must apply. This is not necessarily `remote`:
	/// it may be a local winner or a synthesized merge.
	///
	/// Every pending operation on the same element is resolved against
	/// `remote`; pending operations that lose are dropped. Once any pending
	/// operation beats `remote`, nothing of `remote` is applied and the newest
	/// such local winner is returned. Otherwise the newest pairing decides.
	pub fn receive_remote_operation(&self, remote: Operation) -> Operation {
		if let Some(m) = &self.shared.metrics {
			m.remote_operations_total.inc();
		}

		let (to_apply, events, pending) = {
			let mut inner = self.shared.inner.lock();
			let conflicting: Vec<Operation> = inner
				.state
				.pending_operations
				.iter()
				.filter(|op| op.element_id == remote.element_id)
				.cloned()
				.collect();

			if conflicting.is_empty() {
				inner.state.server_version = inner.state.server_version.max(remote.version);
				return remote;
			}

			let mut events = Vec::with_capacity(conflicting.len() * 2);
			let mut to_apply = remote.clone();
			let mut remote_rejected = false;
			for local in conflicting {
				let resolution = inner.resolver.resolve(&local, &remote);
				if resolution.discards(&local) {
					inner.state.pending_operations.retain(|op| op.id != local.id);
				}
				if resolution.discards(&remote) {
					remote_rejected = true;
					to_apply = resolution.winning_operation.clone();
				} else if !remote_rejected {
					to_apply = resolution.winning_operation.clone();
				}
				events.push(SyncEvent::ConflictDetected {
					local: local.clone(),
					remote: remote.clone(),
				});
				events.push(SyncEvent::ConflictResolved {
					local,
					remote: remote.clone(),
					resolution,
				});
			}
			(to_apply, events, inner.state.pending_operations.len())
		};

		let conflicts = events.len() / 2;
		if let Some(m) = &self.shared.metrics {
			m.conflicts_total.inc_by(conflicts as u64);
			m.pending_operations.set(pending as i64);
		}
		info!(
			"Resolved {} conflict(s) on {} from {}; applying {} {}",
			conflicts, remote.element_id, remote.user_id, to_apply.op_type, to_apply.id
		);

		self.shared.events.emit_all(events);
		to_apply
	}

	/// Start a full resync. Returns the `sync_request` envelope for the
	/// transport to send.
	pub fn request_full_sync(&self) -> CollabMessage {
		let (request, last_known_version) = {
			let inner = self.shared.inner.lock();
			let version = inner.state.server_version;
			(
				CollabMessage::sync_request(&inner.user_id, &inner.board_id, version),
				version,
			)
		};

		if let Some(m) = &self.shared.metrics {
			m.resyncs_total.inc();
		}
		info!("Requesting full sync from server v{}", last_known_version);

		self.shared
			.events
			.emit(SyncEvent::SyncStarted { last_known_version });
		request
	}

	/// Apply the authoritative history returned for a sync request. Returns
	/// the operations to apply, in response order. Surviving pending
	/// operations are announced again through `operation_sent`.
	pub fn handle_sync_response(
		&self,
		operations: Vec<Operation>,
		current_version: u64,
	) -> Vec<Operation> {
		let received = operations.len();
		let to_apply: Vec<Operation> = operations
			.into_iter()
			.map(|op| self.receive_remote_operation(op))
			.collect();

		let survivors = {
			let mut inner = self.shared.inner.lock();
			inner.state.server_version = current_version;
			inner.state.last_sync_time = Some(now_millis());
			inner.state.pending_operations.clone()
		};

		if let Some(m) = &self.shared.metrics {
			m.operations_sent_total.inc_by(survivors.len() as u64);
			m.pending_operations.set(survivors.len() as i64);
		}
		info!(
			"Sync complete at server v{}: {} remote operations, {} pending to retransmit",
			current_version,
			received,
			survivors.len()
		);

		let retransmitted = survivors.len();
		if !survivors.is_empty() {
			self.shared
				.events
				.emit(SyncEvent::OperationSent { operations: survivors });
		}
		self.shared.events.emit(SyncEvent::SyncCompleted {
			server_version: current_version,
			retransmitted,
		});

		to_apply
	}

	/// Edge-triggered connectivity change. Coming back online always starts
	/// a full resync; the returned envelope is that sync request.
	pub fn set_online_status(&self, is_online: bool) -> Option<CollabMessage> {
		let changed = {
			let mut inner = self.shared.inner.lock();
			let changed = inner.state.is_online != is_online;
			inner.state.is_online = is_online;
			changed
		};
		if !changed {
			return None;
		}

		if is_online {
			info!("Connection restored");
			self.shared.events.emit(SyncEvent::ConnectionRestored);
			Some(self.request_full_sync())
		} else {
			warn!("Connection lost");
			self.shared.events.emit(SyncEvent::ConnectionLost);
			None
		}
	}

	/// Clear all session state and cancel any scheduled flush. Connectivity
	/// status is kept.
	pub fn reset(&self) {
		{
			let mut inner = self.shared.inner.lock();
			if let Some(task) = inner.flush_task.take() {
				task.abort();
			}
			inner.buffer.clear();
			inner.state = SyncState {
				is_online: inner.state.is_online,
				..SyncState::default()
			};
		}

		if let Some(m) = &self.shared.metrics {
			m.pending_operations.set(0);
		}
		debug!("Sync state reset");
	}

	/// Move the session to another board and resync against it.
	pub fn switch_board(&self, board_id: impl Into<String>) -> CollabMessage {
		self.reset();
		let board_id = board_id.into();
		info!("Switching to board {}", board_id);
		self.shared.inner.lock().board_id = board_id;
		self.request_full_sync()
	}

	/// Single inbound entry point for the transport adapter. Returns the
	/// operations the caller must apply, in order. Presence traffic and
	/// messages for other boards are ignored.
	pub fn handle_message(&self, message: &CollabMessage) -> Vec<Operation> {
		let board_id = self.board_id();
		if message.board_id() != board_id {
			debug!(
				"Dropping {:?} for board {} (session is on {})",
				message.kind(),
				message.board_id(),
				board_id
			);
			return Vec::new();
		}

		match message {
			CollabMessage::Operation(env) => vec![self.receive_remote_operation(env.payload.clone())],
			CollabMessage::Ack(env) => {
				let ack = &env.payload;
				if ack.success {
					self.acknowledge_operation(&ack.operation_id, ack.server_version);
				} else {
					// Kept pending; the next resync repairs it.
					self.fail_operation(&ack.operation_id, ack.error.clone(), false);
				}
				Vec::new()
			}
			CollabMessage::SyncResponse(env) => self.handle_sync_response(
				env.payload.operations.clone(),
				env.payload.current_version,
			),
			CollabMessage::Rollback(env) => {
				self.fail_operation(&env.payload.operation_id, env.payload.reason.clone(), true);
				Vec::new()
			}
			CollabMessage::Conflict(env) => {
				vec![self.receive_remote_operation(env.payload.server_operation.clone())]
			}
			CollabMessage::SyncRequest(_)
			| CollabMessage::PresenceUpdate(_)
			| CollabMessage::CursorMove(_)
			| CollabMessage::SelectionChange(_) => Vec::new(),
		}
	}

	fn fail_operation(&self, operation_id: &str, error: Option<String>, remove: bool) {
		let pending = {
			let mut inner = self.shared.inner.lock();
			if remove {
				inner
					.state
					.pending_operations
					.retain(|op| op.id != operation_id);
			}
			inner.state.pending_operations.len()
		};

		if let Some(m) = &self.shared.metrics {
			m.operations_failed_total.inc();
			m.pending_operations.set(pending as i64);
		}
		warn!(
			"Operation {} failed: {}",
			operation_id,
			error.as_deref().unwrap_or("no reason given")
		);

		self.shared.events.emit(SyncEvent::OperationFailed {
			operation_id: operation_id.to_string(),
			error,
		});
	}
}

/// Collapse operations per element, preserving first-appearance order.
/// Payloads fold left to right so later keys win; the last operation's
/// type and metadata are kept.
fn coalesce(operations: Vec<Operation>) -> Vec<Operation> {
	let mut merged: Vec<Operation> = Vec::with_capacity(operations.len());
	let mut index: HashMap<String, usize> = HashMap::new();

	for op in operations {
		match index.get(&op.element_id) {
			Some(&i) => {
				let mut payload = std::mem::take(&mut merged[i].payload);
				payload.extend(op.payload);
				merged[i] = Operation { payload, ..op };
			}
			None => {
				index.insert(op.element_id.clone(), merged.len());
				merged.push(op);
			}
		}
	}

	merged
}
