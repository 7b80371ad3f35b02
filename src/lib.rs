#![forbid(unsafe_code)]

pub mod core;
pub mod error;
pub mod inflight;
pub mod storage;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    ConflictBody, CoreError, DocId, Document, DocumentMetadata, InvalidId, Limits, NodeTag,
    OpStatus, ServerId, Source, SyncTag, TxEvent, TxId, VClock,
};
pub use crate::inflight::{
    BroadcastError, DropReason, EventBroadcaster, EventSubscription, Inflight, InflightError,
    StageError, SubscriberLimits,
};
pub use crate::storage::{DocumentStore, MemoryStore, StorageError, StorageTransaction};
