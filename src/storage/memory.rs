//! Reference in-memory storage engine.
//!
//! Transactions buffer their writes and apply them atomically on commit.
//! Deletes leave tombstones that preserve the final metadata, so history
//! stays loadable for replication classification. A one-shot failure hook
//! lets tests exercise the failed-commit path.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::{ConflictBody, DocId, Document, DocumentMetadata, SyncTag};

use super::{DocumentStore, StorageError, StorageTransaction};

/// A persisted document. `body` is `None` for tombstones.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredDocument {
    pub body: Option<Document>,
    pub metadata: DocumentMetadata,
}

impl StoredDocument {
    pub fn is_tombstone(&self) -> bool {
        self.body.is_none()
    }
}

/// A recorded conflicting version.
#[derive(Clone, Debug, PartialEq)]
pub struct ConflictRecord {
    pub body: ConflictBody,
    pub metadata: DocumentMetadata,
}

#[derive(Default)]
struct StoreState {
    documents: BTreeMap<DocId, StoredDocument>,
    conflicts: BTreeMap<DocId, Vec<ConflictRecord>>,
}

struct Shared {
    state: Mutex<StoreState>,
    synctag: AtomicU64,
    fail_next_commit: AtomicBool,
}

/// In-memory document store.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StoreState::default()),
                synctag: AtomicU64::new(0),
                fail_next_commit: AtomicBool::new(false),
            }),
        }
    }

    /// Arm a one-shot failure for the next transaction commit.
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Snapshot of a persisted document, tombstones included.
    pub fn document(&self, id: &DocId) -> Option<StoredDocument> {
        self.lock_state().documents.get(id).cloned()
    }

    /// Recorded conflicting versions for a document, oldest first.
    pub fn conflicts(&self, id: &DocId) -> Vec<ConflictRecord> {
        self.lock_state()
            .conflicts
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of live (non-tombstone) documents.
    pub fn live_document_count(&self) -> usize {
        self.lock_state()
            .documents
            .values()
            .filter(|d| !d.is_tombstone())
            .count()
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    type Tx = MemoryTransaction;

    fn begin(&self) -> Result<MemoryTransaction, StorageError> {
        Ok(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            writes: Vec::new(),
            committed: false,
        })
    }

    fn next_synctag(&self) -> Result<SyncTag, StorageError> {
        let n = self.shared.synctag.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SyncTag::new(n))
    }

    fn load_document_metadata(
        &self,
        id: &DocId,
    ) -> Result<Option<DocumentMetadata>, StorageError> {
        Ok(self.lock_state().documents.get(id).map(|d| d.metadata.clone()))
    }
}

enum BufferedWrite {
    Store {
        id: DocId,
        document: Document,
        metadata: DocumentMetadata,
    },
    Delete {
        id: DocId,
        metadata: DocumentMetadata,
    },
    Conflict {
        id: DocId,
        body: ConflictBody,
        metadata: DocumentMetadata,
    },
}

/// A buffered transaction against a [`MemoryStore`].
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    writes: Vec<BufferedWrite>,
    committed: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.committed {
            Err(StorageError::TransactionClosed)
        } else {
            Ok(())
        }
    }
}

impl StorageTransaction for MemoryTransaction {
    fn store_document(
        &mut self,
        id: &DocId,
        document: &Document,
        metadata: &DocumentMetadata,
    ) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.writes.push(BufferedWrite::Store {
            id: id.clone(),
            document: document.clone(),
            metadata: metadata.clone(),
        });
        Ok(())
    }

    fn delete_document(
        &mut self,
        id: &DocId,
        metadata: &DocumentMetadata,
    ) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.writes.push(BufferedWrite::Delete {
            id: id.clone(),
            metadata: metadata.clone(),
        });
        Ok(())
    }

    fn store_conflict(
        &mut self,
        id: &DocId,
        body: &ConflictBody,
        metadata: &DocumentMetadata,
    ) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.writes.push(BufferedWrite::Conflict {
            id: id.clone(),
            body: body.clone(),
            metadata: metadata.clone(),
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.ensure_open()?;
        if self.shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Backend {
                reason: "injected commit failure".into(),
            });
        }

        let mut state = self
            .shared
            .state
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        for write in self.writes.drain(..) {
            match write {
                BufferedWrite::Store {
                    id,
                    document,
                    metadata,
                } => {
                    state.documents.insert(
                        id,
                        StoredDocument {
                            body: Some(document),
                            metadata,
                        },
                    );
                }
                BufferedWrite::Delete { id, metadata } => {
                    state.documents.insert(
                        id,
                        StoredDocument {
                            body: None,
                            metadata,
                        },
                    );
                }
                BufferedWrite::Conflict { id, body, metadata } => {
                    state
                        .conflicts
                        .entry(id)
                        .or_default()
                        .push(ConflictRecord { body, metadata });
                }
            }
        }
        self.committed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::VClock;

    use super::*;

    fn doc_id(s: &str) -> DocId {
        DocId::new(s).unwrap()
    }

    fn body(s: &str) -> Document {
        Document::new(s.as_bytes().to_vec())
    }

    #[test]
    fn writes_are_invisible_until_commit() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        tx.store_document(&doc_id("a"), &body("one"), &DocumentMetadata::default())
            .unwrap();

        assert!(store.document(&doc_id("a")).is_none());
        tx.commit().unwrap();
        let stored = store.document(&doc_id("a")).unwrap();
        assert_eq!(stored.body, Some(body("one")));
    }

    #[test]
    fn delete_leaves_tombstone_with_metadata() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        tx.store_document(&doc_id("a"), &body("one"), &DocumentMetadata::default())
            .unwrap();
        tx.commit().unwrap();

        let metadata = DocumentMetadata::with_history(VClock::new());
        let mut tx = store.begin().unwrap();
        tx.delete_document(&doc_id("a"), &metadata).unwrap();
        tx.commit().unwrap();

        let stored = store.document(&doc_id("a")).unwrap();
        assert!(stored.is_tombstone());
        assert_eq!(
            store.load_document_metadata(&doc_id("a")).unwrap(),
            Some(metadata)
        );
        assert_eq!(store.live_document_count(), 0);
    }

    #[test]
    fn conflicts_accumulate_in_order() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        tx.store_conflict(
            &doc_id("a"),
            &ConflictBody::Document(body("first")),
            &DocumentMetadata::default(),
        )
        .unwrap();
        tx.store_conflict(
            &doc_id("a"),
            &ConflictBody::Deleted,
            &DocumentMetadata::default(),
        )
        .unwrap();
        tx.commit().unwrap();

        let conflicts = store.conflicts(&doc_id("a"));
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].body, ConflictBody::Document(body("first")));
        assert_eq!(conflicts[1].body, ConflictBody::Deleted);
    }

    #[test]
    fn synctags_are_strictly_monotonic() {
        let store = MemoryStore::new();
        let a = store.next_synctag().unwrap();
        let b = store.next_synctag().unwrap();
        let c = store.next_synctag().unwrap();
        assert!(a < b && b < c);
        assert_eq!(a.as_u64(), 1);
    }

    #[test]
    fn commit_is_one_shot() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        tx.commit().unwrap();
        assert!(matches!(
            tx.commit(),
            Err(StorageError::TransactionClosed)
        ));
        assert!(matches!(
            tx.store_document(&doc_id("a"), &body("one"), &DocumentMetadata::default()),
            Err(StorageError::TransactionClosed)
        ));
    }

    #[test]
    fn injected_commit_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_next_commit();

        let mut tx = store.begin().unwrap();
        tx.store_document(&doc_id("a"), &body("one"), &DocumentMetadata::default())
            .unwrap();
        assert!(matches!(
            tx.commit(),
            Err(StorageError::Backend { .. })
        ));
        assert!(store.document(&doc_id("a")).is_none());

        let mut tx = store.begin().unwrap();
        tx.store_document(&doc_id("a"), &body("one"), &DocumentMetadata::default())
            .unwrap();
        tx.commit().unwrap();
        assert!(store.document(&doc_id("a")).is_some());
    }

    #[test]
    fn dropped_transaction_discards_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().unwrap();
        tx.store_document(&doc_id("a"), &body("one"), &DocumentMetadata::default())
            .unwrap();
        drop(tx);
        assert!(store.document(&doc_id("a")).is_none());
    }
}
