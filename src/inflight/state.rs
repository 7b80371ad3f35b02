//! Staged state shared by all open transactions.
//!
//! Two mappings updated atomically together behind the handle's lock: open
//! transactions with their pending ops, and the cross-transaction staging
//! view of every touched document.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::{DocId, Document, DocumentMetadata, OpStatus, Source, TxId, VClock};

/// What a staged operation asks of storage.
#[derive(Clone, Debug, PartialEq)]
pub enum OpRequest {
    Add(Document),
    Delete,
}

impl OpRequest {
    pub fn is_delete(&self) -> bool {
        matches!(self, OpRequest::Delete)
    }
}

/// One staged operation for a `(transaction, document)` pair.
#[derive(Clone, Debug, PartialEq)]
pub struct OpRecord {
    pub request: OpRequest,
    pub id: DocId,
    pub metadata: DocumentMetadata,
    pub status: OpStatus,
}

/// A single open transaction and its pending operations.
///
/// At most one staged op per document: a later stage on the same id
/// overwrites the earlier one.
#[derive(Debug)]
pub struct TransactionRecord<Tx> {
    pub tx: Tx,
    pub ops: BTreeMap<DocId, OpRecord>,
    pub source: Source,
}

/// Cross-transaction staging view of one document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentStaging {
    /// Most recent history stamped by any still-open transaction;
    /// authoritative over storage for classification while it exists.
    /// Only ever set by an op classified `Write`.
    pub current_history: Option<VClock>,
    /// Open transactions holding a staged op for this document.
    pub refs: BTreeSet<TxId>,
}

/// The in-flight state proper.
#[derive(Debug)]
pub struct InflightState<Tx> {
    pub transactions: BTreeMap<TxId, TransactionRecord<Tx>>,
    pub documents: BTreeMap<DocId, DocumentStaging>,
}

impl<Tx> InflightState<Tx> {
    pub fn new() -> Self {
        Self {
            transactions: BTreeMap::new(),
            documents: BTreeMap::new(),
        }
    }

    pub fn is_txid(&self, txid: TxId) -> bool {
        self.transactions.contains_key(&txid)
    }

    pub fn is_registered(&self, id: &DocId) -> bool {
        self.documents.contains_key(id)
    }

    /// Remove a transaction without touching document refs.
    ///
    /// Used by `complete`, which needs the record (and its storage
    /// transaction) out of the map while the fold runs; refs are released
    /// afterwards so concurrent stagers keep seeing the staged history.
    pub fn remove_transaction(&mut self, txid: TxId) -> Option<TransactionRecord<Tx>> {
        self.transactions.remove(&txid)
    }

    pub fn reinstall_transaction(&mut self, txid: TxId, record: TransactionRecord<Tx>) {
        self.transactions.insert(txid, record);
    }

    /// Drop `txid` from the refs of every listed document, removing staging
    /// entries whose ref set empties.
    pub fn release_refs<'a>(&mut self, txid: TxId, ids: impl IntoIterator<Item = &'a DocId>) {
        for id in ids {
            let emptied = match self.documents.get_mut(id) {
                Some(staging) => {
                    staging.refs.remove(&txid);
                    staging.refs.is_empty()
                }
                None => false,
            };
            if emptied {
                self.documents.remove(id);
            }
        }
    }

    /// Remove a transaction and release its document refs in one step.
    pub fn clean_up(&mut self, txid: TxId) -> Option<TransactionRecord<Tx>> {
        let record = self.transactions.remove(&txid)?;
        let ids: Vec<DocId> = record.ops.keys().cloned().collect();
        self.release_refs(txid, ids.iter());
        Some(record)
    }
}

impl<Tx> Default for InflightState<Tx> {
    fn default() -> Self {
        Self::new()
    }
}
