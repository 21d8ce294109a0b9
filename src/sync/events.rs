use log::error;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

use crate::sync::merge::Resolution;
use crate::sync::operation::Operation;

/// Event kinds a listener can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
	OperationSent,
	OperationAcknowledged,
	OperationFailed,
	SyncStarted,
	SyncCompleted,
	ConflictDetected,
	ConflictResolved,
	ConnectionLost,
	ConnectionRestored,
}

/// Events emitted by the sync manager.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
	/// Operations ready for the transport to deliver.
	OperationSent { operations: Vec<Operation> },
	OperationAcknowledged { operation_id: String, server_version: u64 },
	OperationFailed { operation_id: String, error: Option<String> },
	SyncStarted { last_known_version: u64 },
	SyncCompleted { server_version: u64, retransmitted: usize },
	ConflictDetected { local: Operation, remote: Operation },
	ConflictResolved {
		local: Operation,
		remote: Operation,
		resolution: Resolution,
	},
	ConnectionLost,
	ConnectionRestored,
}

impl SyncEvent {
	pub fn kind(&self) -> EventKind {
		match self {
			SyncEvent::OperationSent { .. } => EventKind::OperationSent,
			SyncEvent::OperationAcknowledged { .. } => EventKind::OperationAcknowledged,
			SyncEvent::OperationFailed { .. } => EventKind::OperationFailed,
			SyncEvent::SyncStarted { .. } => EventKind::SyncStarted,
			SyncEvent::SyncCompleted { .. } => EventKind::SyncCompleted,
			SyncEvent::ConflictDetected { .. } => EventKind::ConflictDetected,
			SyncEvent::ConflictResolved { .. } => EventKind::ConflictResolved,
			SyncEvent::ConnectionLost => EventKind::ConnectionLost,
			SyncEvent::ConnectionRestored => EventKind::ConnectionRestored,
		}
	}
}

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct BusInner {
	listeners: Mutex<HashMap<EventKind, Vec<(u64, Listener)>>>,
	next_id: AtomicU64,
	broadcast: broadcast::Sender<SyncEvent>,
}

/// In-process observer registry with a broadcast mirror for consumers on
/// other tasks. Listener delivery is synchronous and in registration order.
#[derive(Clone)]
pub struct EventBus {
	inner: Arc<BusInner>,
}

impl EventBus {
	pub fn new(broadcast_capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(broadcast_capacity.max(1));
		Self {
			inner: Arc::new(BusInner {
				listeners: Mutex::new(HashMap::new()),
				next_id: AtomicU64::new(1),
				broadcast: tx,
			}),
		}
	}

	/// Register `callback` for events of `kind`.
	pub fn on<F>(&self, kind: EventKind, callback: F) -> Subscription
	where
		F: Fn(&SyncEvent) + Send + Sync + 'static,
	{
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		self.inner
			.listeners
			.lock()
			.entry(kind)
			.or_default()
			.push((id, Arc::new(callback)));
		Subscription {
			bus: Arc::downgrade(&self.inner),
			kind,
			id,
		}
	}

	/// Receive every emitted event on a channel. Slow receivers lag and
	/// lose old events; they never hold up emission.
	pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
		self.inner.broadcast.subscribe()
	}

	pub fn listener_count(&self, kind: EventKind) -> usize {
		self.inner.listeners.lock().get(&kind).map_or(0, Vec::len)
	}

	pub fn emit(&self, event: SyncEvent) {
		// Snapshot so listeners may (un)subscribe while being called.
		let listeners: Vec<Listener> = self
			.inner
			.listeners
			.lock()
			.get(&event.kind())
			.map(|l| l.iter().map(|(_, f)| Arc::clone(f)).collect())
			.unwrap_or_default();

		for listener in listeners {
			if catch_unwind(AssertUnwindSafe(|| (*listener)(&event))).is_err() {
				error!("Listener for {:?} panicked; continuing with remaining listeners", event.kind());
			}
		}

		// No receivers is not an error.
		let _ = self.inner.broadcast.send(event);
	}

	pub fn emit_all(&self, events: impl IntoIterator<Item = SyncEvent>) {
		for event in events {
			self.emit(event);
		}
	}
}

/// Handle returned by [`EventBus::on`]. Dropping it keeps the listener
/// registered; call [`Subscription::unsubscribe`] to remove it.
#[must_use = "dropping a Subscription leaves the listener registered forever"]
pub struct Subscription {
	bus: Weak<BusInner>,
	kind: EventKind,
	id: u64,
}

impl Subscription {
	pub fn kind(&self) -> EventKind {
		self.kind
	}

	pub fn unsubscribe(self) {
		if let Some(bus) = self.bus.upgrade() {
			if let Some(list) = bus.listeners.lock().get_mut(&self.kind) {
				list.retain(|(id, _)| *id != self.id);
			}
		}
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn test_listeners_run_in_registration_order() {
		let bus = EventBus::new(8);
		let seen = Arc::new(Mutex::new(Vec::new()));

		for n in 0..3 {
			let seen = Arc::clone(&seen);
			let _ = bus.on(EventKind::ConnectionLost, move |_| seen.lock().push(n));
		}
		bus.emit(SyncEvent::ConnectionLost);

		assert_eq!(*seen.lock(), vec![0, 1, 2]);
	}

	#[test]
	fn test_only_matching_kind_is_notified() {
		let bus = EventBus::new(8);
		let hits = Arc::new(AtomicU64::new(0));
		let counter = Arc::clone(&hits);
		let _sub = bus.on(EventKind::ConnectionRestored, move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		bus.emit(SyncEvent::ConnectionLost);
		assert_eq!(hits.load(Ordering::SeqCst), 0);
		bus.emit(SyncEvent::ConnectionRestored);
		assert_eq!(hits.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_unsubscribe_removes_listener() {
		let bus = EventBus::new(8);
		let hits = Arc::new(AtomicU64::new(0));
		let counter = Arc::clone(&hits);
		let sub = bus.on(EventKind::ConnectionLost, move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});
		assert_eq!(bus.listener_count(EventKind::ConnectionLost), 1);
		assert_eq!(sub.kind(), EventKind::ConnectionLost);

		sub.unsubscribe();
		bus.emit(SyncEvent::ConnectionLost);

		assert_eq!(bus.listener_count(EventKind::ConnectionLost), 0);
		assert_eq!(hits.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn test_panicking_listener_does_not_block_others() {
		let bus = EventBus::new(8);
		let hits = Arc::new(AtomicU64::new(0));

		let _ = bus.on(EventKind::SyncStarted, |_| panic!("listener failure"));
		let counter = Arc::clone(&hits);
		let _ = bus.on(EventKind::SyncStarted, move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		bus.emit(SyncEvent::SyncStarted { last_known_version: 0 });
		assert_eq!(hits.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_broadcast_mirror_receives_events() {
		let bus = EventBus::new(8);
		let mut rx = bus.subscribe();

		bus.emit(SyncEvent::SyncCompleted {
			server_version: 4,
			retransmitted: 0,
		});

		let event = rx.recv().await.unwrap();
		assert_eq!(event.kind(), EventKind::SyncCompleted);
	}
}
