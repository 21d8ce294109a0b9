//! Client-side synchronization core for a collaborative canvas.
//!
//! Local edits become [`sync::Operation`]s that are batched, sent, and
//! reconciled against concurrent remote edits by a [`sync::SyncManager`].
//! Transport and rendering live outside this crate.

pub mod config;
pub mod observability;
pub mod sync;

pub use config::{Settings, SettingsError};
pub use sync::{
	CollabMessage, ConflictResolver, EventKind, NewOperation, Operation, OperationType, Resolution,
	ResolutionStrategy, SyncEvent, SyncManager, SyncOptions, SyncState,
};
