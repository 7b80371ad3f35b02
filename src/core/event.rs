//! Layer 4: Transaction lifecycle events
//!
//! Published on the handle's broadcast channel as a transaction folds into
//! storage and commits.

use serde::{Deserialize, Serialize};

use super::document::{Document, DocumentMetadata};
use super::identity::{DocId, TxId};

/// A lifecycle event from the in-flight manager.
///
/// `DocAdded` / `DocDeleted` are emitted while a transaction folds into the
/// storage transaction, before the commit is confirmed. Subscribers must
/// treat them as proposed until the matching `Committed` arrives; a failed
/// commit never rescinds them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxEvent {
    DocAdded {
        txid: TxId,
        id: DocId,
        document: Document,
        metadata: DocumentMetadata,
    },
    DocDeleted {
        txid: TxId,
        id: DocId,
        metadata: DocumentMetadata,
    },
    Committed {
        txid: TxId,
    },
}

impl TxEvent {
    /// The transaction this event is attributable to.
    pub fn txid(&self) -> TxId {
        match self {
            TxEvent::DocAdded { txid, .. }
            | TxEvent::DocDeleted { txid, .. }
            | TxEvent::Committed { txid } => *txid,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, TxEvent::Committed { .. })
    }
}
