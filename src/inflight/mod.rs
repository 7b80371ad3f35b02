//! The in-flight transaction manager.
//!
//! The staging layer between callers (client API, replication receivers)
//! and the storage engine. Many write transactions stay open at once, each
//! owning one underlying storage transaction; staged operations are
//! classified against the latest known causal history - including history
//! staged by other still-open transactions - and folded into storage on
//! `complete`. Lifecycle events stream to any number of subscribers
//! without ever blocking a writer.
//!
//! Concurrency model: one mutex guards the staged state; storage I/O for
//! staging (metadata lookup, synctag allocation) happens before the lock
//! is taken, and the commit fold runs on a record removed from the map, so
//! the lock is never held across engine calls.

pub mod broadcast;
pub mod stage;
pub mod state;

pub use broadcast::{
    BroadcastError, BroadcasterLimits, DropReason, EventBroadcaster, EventSubscription,
    SubscriberLimits,
};
pub use stage::{StageError, StageRequest};
pub use state::{DocumentStaging, InflightState, OpRecord, OpRequest, TransactionRecord};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::core::{
    ConflictBody, DocId, Document, DocumentMetadata, Limits, OpStatus, ServerId, Source, TxEvent,
    TxId,
};
use crate::error::{Effect, Transience};
use crate::storage::{DocumentStore, StorageError, StorageTransaction};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InflightError {
    #[error("unknown transaction {txid}")]
    UnknownTransaction { txid: TxId },

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The final storage commit failed. Staged state is left intact so the
    /// caller can inspect or retry `complete`.
    #[error("commit failed for transaction {txid}")]
    CommitFailed {
        txid: TxId,
        #[source]
        source: StorageError,
    },
}

impl InflightError {
    pub fn transience(&self) -> Transience {
        match self {
            InflightError::UnknownTransaction { .. } => Transience::Permanent,
            InflightError::Storage(e) => e.transience(),
            InflightError::CommitFailed { source, .. } => source.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            InflightError::UnknownTransaction { .. } => Effect::None,
            InflightError::Storage(e) => e.effect(),
            InflightError::CommitFailed { .. } => Effect::Unknown,
        }
    }
}

impl From<StageError> for InflightError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::UnknownTransaction { txid } => InflightError::UnknownTransaction { txid },
        }
    }
}

/// Handle over the in-flight state of one node.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct Inflight<S: DocumentStore> {
    server_id: ServerId,
    store: Arc<S>,
    limits: Limits,
    tx_count: AtomicU64,
    state: Mutex<InflightState<S::Tx>>,
    broadcaster: EventBroadcaster,
}

impl<S: DocumentStore> Inflight<S> {
    pub fn new(store: Arc<S>, server_id: ServerId) -> Self {
        Self::with_limits(store, server_id, Limits::default())
    }

    pub fn with_limits(store: Arc<S>, server_id: ServerId, limits: Limits) -> Self {
        let broadcaster = EventBroadcaster::new(BroadcasterLimits::from_limits(&limits));
        Self {
            server_id,
            store,
            limits,
            tx_count: AtomicU64::new(0),
            state: Mutex::new(InflightState::new()),
            broadcaster,
        }
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Open a new write transaction.
    ///
    /// The storage transaction is begun first; only on success is the fresh
    /// id installed, so a refused begin leaves no partial state behind.
    pub fn open(&self, source: Source) -> Result<TxId, InflightError> {
        let tx = self.store.begin()?;
        let txid = TxId::new(self.tx_count.fetch_add(1, Ordering::SeqCst) + 1);
        self.lock_state().transactions.insert(
            txid,
            TransactionRecord {
                tx,
                ops: BTreeMap::new(),
                source,
            },
        );
        tracing::debug!(txid = %txid, source = source.as_str(), "transaction opened");
        Ok(txid)
    }

    /// Stage a document write into an open transaction.
    pub fn add_document(
        &self,
        txid: TxId,
        id: DocId,
        document: Document,
        metadata: DocumentMetadata,
    ) -> Result<OpStatus, InflightError> {
        self.stage(txid, id, Some(document), metadata)
    }

    /// Stage a document delete into an open transaction.
    pub fn delete_document(
        &self,
        txid: TxId,
        id: DocId,
        metadata: DocumentMetadata,
    ) -> Result<OpStatus, InflightError> {
        self.stage(txid, id, None, metadata)
    }

    fn stage(
        &self,
        txid: TxId,
        id: DocId,
        document: Option<Document>,
        metadata: DocumentMetadata,
    ) -> Result<OpStatus, InflightError> {
        if !self.is_txid(txid) {
            return Err(InflightError::UnknownTransaction { txid });
        }

        // Captured before the lock so the pipeline stays a pure function of
        // (state, request). The persisted read carries the same benign
        // staleness as classification itself: status is fixed at staging
        // time.
        let persisted = self.store.load_document_metadata(&id)?;
        let synctag = self.store.next_synctag()?;
        let node_tag = self.server_id.tag_for(txid);

        let req = StageRequest {
            txid,
            id: id.clone(),
            document,
            metadata,
            persisted,
            synctag,
            node_tag,
        };
        let status = stage::stage_op(&mut self.lock_state(), req)?;
        tracing::debug!(txid = %txid, id = %id, status = status.as_str(), "operation staged");
        Ok(status)
    }

    /// Commit an open transaction: fold its staged ops into the storage
    /// transaction, commit, release staged state, emit `Committed`.
    ///
    /// On a storage fault the transaction stays installed (with a freshly
    /// begun storage transaction) and `complete` may be retried. Events
    /// already emitted during the fold are not rescinded; subscribers treat
    /// them as proposed until they observe `Committed`.
    pub fn complete(&self, txid: TxId) -> Result<(), InflightError> {
        let mut record = self
            .lock_state()
            .remove_transaction(txid)
            .ok_or(InflightError::UnknownTransaction { txid })?;

        if let Err(err) = self.fold_ops(txid, &mut record) {
            tracing::warn!(txid = %txid, error = %err, "commit fold failed, staged state retained");
            self.reinstall(txid, record);
            return Err(InflightError::Storage(err));
        }

        if let Err(err) = record.tx.commit() {
            tracing::warn!(txid = %txid, error = %err, "storage commit failed, staged state retained");
            self.reinstall(txid, record);
            return Err(InflightError::CommitFailed { txid, source: err });
        }

        let ops = record.ops.len();
        self.lock_state().release_refs(txid, record.ops.keys());
        self.publish(TxEvent::Committed { txid });
        tracing::info!(txid = %txid, ops, "transaction committed");
        Ok(())
    }

    /// Discard an open transaction without committing: staged state is
    /// released and the storage transaction is dropped. No events.
    pub fn abort(&self, txid: TxId) -> Result<(), InflightError> {
        let record = self
            .lock_state()
            .clean_up(txid)
            .ok_or(InflightError::UnknownTransaction { txid })?;
        drop(record);
        tracing::debug!(txid = %txid, "transaction aborted");
        Ok(())
    }

    /// True iff any open transaction has staged an op for this document.
    pub fn is_registered(&self, id: &DocId) -> bool {
        self.lock_state().is_registered(id)
    }

    /// True iff the transaction is currently open.
    pub fn is_txid(&self, txid: TxId) -> bool {
        self.lock_state().is_txid(txid)
    }

    pub fn open_transactions(&self) -> usize {
        self.lock_state().transactions.len()
    }

    /// The fan-out over the event stream.
    pub fn events(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    /// Subscribe with the handle's configured queue bound.
    pub fn subscribe(&self) -> Result<EventSubscription, BroadcastError> {
        self.broadcaster
            .subscribe(SubscriberLimits::from_limits(&self.limits))
    }

    pub fn subscribe_with(
        &self,
        limits: SubscriberLimits,
    ) -> Result<EventSubscription, BroadcastError> {
        self.broadcaster.subscribe(limits)
    }

    /// Fold staged ops into the storage transaction in ascending `DocId`
    /// order, emitting the matching event after each applied op.
    fn fold_ops(
        &self,
        txid: TxId,
        record: &mut TransactionRecord<S::Tx>,
    ) -> Result<(), StorageError> {
        for (id, op) in &record.ops {
            match (op.status, &op.request) {
                (OpStatus::Skip, _) => {}
                (OpStatus::Write, OpRequest::Add(document)) => {
                    record.tx.store_document(id, document, &op.metadata)?;
                    self.publish(TxEvent::DocAdded {
                        txid,
                        id: id.clone(),
                        document: document.clone(),
                        metadata: op.metadata.clone(),
                    });
                }
                (OpStatus::Write, OpRequest::Delete) => {
                    record.tx.delete_document(id, &op.metadata)?;
                    self.publish(TxEvent::DocDeleted {
                        txid,
                        id: id.clone(),
                        metadata: op.metadata.clone(),
                    });
                }
                (OpStatus::Conflict, OpRequest::Add(document)) => {
                    record.tx.store_conflict(
                        id,
                        &ConflictBody::Document(document.clone()),
                        &op.metadata,
                    )?;
                    self.publish(TxEvent::DocAdded {
                        txid,
                        id: id.clone(),
                        document: document.clone(),
                        metadata: op.metadata.clone(),
                    });
                }
                (OpStatus::Conflict, OpRequest::Delete) => {
                    record
                        .tx
                        .store_conflict(id, &ConflictBody::Deleted, &op.metadata)?;
                    self.publish(TxEvent::DocDeleted {
                        txid,
                        id: id.clone(),
                        metadata: op.metadata.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Put a transaction back after a failed commit, swapping in a fresh
    /// storage transaction so a retry re-folds from the staged ops.
    fn reinstall(&self, txid: TxId, mut record: TransactionRecord<S::Tx>) {
        match self.store.begin() {
            Ok(fresh) => record.tx = fresh,
            Err(err) => {
                tracing::error!(
                    txid = %txid,
                    error = %err,
                    "could not refresh storage transaction after failed commit"
                );
            }
        }
        self.lock_state().reinstall_transaction(txid, record);
    }

    fn publish(&self, event: TxEvent) {
        if let Err(err) = self.broadcaster.publish(event) {
            tracing::warn!(error = %err, "event publish failed");
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, InflightState<S::Tx>> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::mpsc;
    use std::thread;

    use crate::storage::MemoryStore;

    use super::*;

    fn doc_id(s: &str) -> DocId {
        DocId::new(s).unwrap()
    }

    fn handle() -> (Arc<MemoryStore>, Inflight<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let inflight = Inflight::new(Arc::clone(&store), ServerId::new("srv-1").unwrap());
        (store, inflight)
    }

    #[test]
    fn open_then_complete_clears_the_transaction() {
        let (_store, inflight) = handle();
        let t1 = inflight.open(Source::Client).unwrap();

        assert!(inflight.is_txid(t1));
        assert_eq!(inflight.open_transactions(), 1);

        inflight.complete(t1).unwrap();
        assert!(!inflight.is_txid(t1));
        assert_eq!(inflight.open_transactions(), 0);
    }

    #[test]
    fn complete_of_unknown_transaction_fails() {
        let (_store, inflight) = handle();
        let unknown = TxId::from_u64(99).unwrap();
        assert!(matches!(
            inflight.complete(unknown),
            Err(InflightError::UnknownTransaction { .. })
        ));
    }

    #[test]
    fn staging_after_complete_fails() {
        let (_store, inflight) = handle();
        let t1 = inflight.open(Source::Client).unwrap();
        inflight.complete(t1).unwrap();

        let err = inflight
            .add_document(
                t1,
                doc_id("a"),
                Document::new("body"),
                DocumentMetadata::default(),
            )
            .unwrap_err();
        assert!(matches!(err, InflightError::UnknownTransaction { .. }));
    }

    #[test]
    fn abort_discards_staged_writes_and_refs() {
        let (store, inflight) = handle();
        let t1 = inflight.open(Source::Client).unwrap();
        inflight
            .add_document(
                t1,
                doc_id("a"),
                Document::new("body"),
                DocumentMetadata::default(),
            )
            .unwrap();
        assert!(inflight.is_registered(&doc_id("a")));

        inflight.abort(t1).unwrap();
        assert!(!inflight.is_txid(t1));
        assert!(!inflight.is_registered(&doc_id("a")));
        assert!(store.document(&doc_id("a")).is_none());
    }

    #[test]
    fn abort_of_unknown_transaction_fails() {
        let (_store, inflight) = handle();
        assert!(matches!(
            inflight.abort(TxId::from_u64(5).unwrap()),
            Err(InflightError::UnknownTransaction { .. })
        ));
    }

    #[test]
    fn concurrent_opens_yield_distinct_positive_ids() {
        let (_store, inflight) = handle();
        let inflight = Arc::new(inflight);
        let (sender, receiver) = mpsc::channel();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let inflight = Arc::clone(&inflight);
                let sender = sender.clone();
                thread::spawn(move || {
                    for _ in 0..16 {
                        let txid = inflight.open(Source::Client).unwrap();
                        sender.send(txid).unwrap();
                    }
                })
            })
            .collect();
        drop(sender);
        for t in threads {
            t.join().unwrap();
        }

        let ids: Vec<TxId> = receiver.iter().collect();
        assert_eq!(ids.len(), 8 * 16);
        let distinct: BTreeSet<TxId> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), ids.len());
        assert!(ids.iter().all(|id| id.as_u64() > 0));
        assert_eq!(inflight.open_transactions(), 8 * 16);
    }

    #[test]
    fn errors_carry_transience_and_effect() {
        let err = InflightError::UnknownTransaction {
            txid: TxId::from_u64(1).unwrap(),
        };
        assert_eq!(err.transience(), Transience::Permanent);
        assert_eq!(err.effect(), Effect::None);

        let err = InflightError::CommitFailed {
            txid: TxId::from_u64(1).unwrap(),
            source: StorageError::Backend {
                reason: "boom".into(),
            },
        };
        assert!(err.transience().is_retryable());
        assert_eq!(err.effect(), Effect::Unknown);
    }
}
