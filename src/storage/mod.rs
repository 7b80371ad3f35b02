//! Storage engine seam.
//!
//! The in-flight manager consumes exactly this surface: transaction
//! begin/commit, synctag allocation, and metadata lookup for staging
//! classification. Durability and crash recovery are the engine's problem;
//! the manager's responsibility ends at `commit`.

use thiserror::Error;

use crate::core::{ConflictBody, DocId, Document, DocumentMetadata, SyncTag};
use crate::error::{Effect, Transience};

pub mod memory;

pub use memory::MemoryStore;

/// A storage engine hosting durable documents.
pub trait DocumentStore: Send + Sync {
    type Tx: StorageTransaction;

    /// Begin a fresh storage transaction.
    fn begin(&self) -> Result<Self::Tx, StorageError>;

    /// Allocate the next globally monotonic synctag.
    fn next_synctag(&self) -> Result<SyncTag, StorageError>;

    /// Persisted metadata for a document, tombstones included.
    ///
    /// Deleted documents must keep reporting their final history so that
    /// replication can classify writes against the delete's causality.
    fn load_document_metadata(&self, id: &DocId)
        -> Result<Option<DocumentMetadata>, StorageError>;
}

/// A single storage transaction.
///
/// Single-threaded by contract: owned by whichever thread is folding it.
/// Dropping an uncommitted transaction discards its writes.
pub trait StorageTransaction: Send {
    fn store_document(
        &mut self,
        id: &DocId,
        document: &Document,
        metadata: &DocumentMetadata,
    ) -> Result<(), StorageError>;

    fn delete_document(&mut self, id: &DocId, metadata: &DocumentMetadata)
        -> Result<(), StorageError>;

    /// Record a conflicting version for later resolution; the document body
    /// or the deleted sentinel, never applied to the live document.
    fn store_conflict(
        &mut self,
        id: &DocId,
        body: &ConflictBody,
        metadata: &DocumentMetadata,
    ) -> Result<(), StorageError>;

    /// Durably commit every buffered write.
    fn commit(&mut self) -> Result<(), StorageError>;
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage backend fault: {reason}")]
    Backend { reason: String },
    #[error("storage transaction already committed")]
    TransactionClosed,
    #[error("storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub fn transience(&self) -> Transience {
        match self {
            StorageError::Backend { .. } => Transience::Retryable,
            StorageError::TransactionClosed => Transience::Permanent,
            StorageError::LockPoisoned => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            StorageError::Backend { .. } => Effect::Unknown,
            StorageError::TransactionClosed => Effect::None,
            StorageError::LockPoisoned => Effect::Unknown,
        }
    }
}
