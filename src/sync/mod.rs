pub mod events;
pub mod manager;
pub mod merge;
pub mod message;
pub mod operation;

pub use events::{EventBus, EventKind, Subscription, SyncEvent};
pub use manager::{SyncManager, SyncOptions, SyncState};
pub use merge::{ConflictResolver, ParseStrategyError, Resolution, ResolutionStrategy, merge_payloads};
pub use message::{
	AckPayload, CollabMessage, ConflictPayload, Envelope, MessageKind, ProtocolError,
	create_operation_message, deserialize_message, serialize_message,
};
pub use operation::{NewOperation, Operation, OperationType, Payload, generate_id};
