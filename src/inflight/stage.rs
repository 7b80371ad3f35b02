//! The write-request pipeline.
//!
//! Staging one operation is a single transformation of the in-flight
//! state: install the op, ensure it carries a causal history, classify it
//! against the last-known history, stamp the written metadata, and update
//! the cross-transaction staging log. Everything the pipeline needs from
//! the outside world (persisted metadata, a synctag) is captured in the
//! request up front, so the transformation itself is a pure function of
//! `(state, request)`.

use thiserror::Error;

use crate::core::{
    DocId, Document, DocumentMetadata, NodeTag, OpStatus, Source, SyncTag, TxId, VClock,
};
use crate::error::{Effect, Transience};

use super::state::{InflightState, OpRecord, OpRequest};

/// Inputs to one staging pipeline run.
#[derive(Clone, Debug)]
pub struct StageRequest {
    pub txid: TxId,
    pub id: DocId,
    pub document: Option<Document>,
    pub metadata: DocumentMetadata,
    /// Persisted metadata loaded from storage before the update.
    pub persisted: Option<DocumentMetadata>,
    /// Synctag allocated for this op before the update.
    pub synctag: SyncTag,
    /// Slot for client-side history advances (`server:txid`).
    pub node_tag: NodeTag,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("unknown transaction {txid}")]
    UnknownTransaction { txid: TxId },
}

impl StageError {
    pub fn transience(&self) -> Transience {
        match self {
            StageError::UnknownTransaction { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            StageError::UnknownTransaction { .. } => Effect::None,
        }
    }
}

/// Run the pipeline: stage one operation into the in-flight state and
/// return its classification.
pub fn stage_op<Tx>(
    state: &mut InflightState<Tx>,
    req: StageRequest,
) -> Result<OpStatus, StageError> {
    let record = state
        .transactions
        .get_mut(&req.txid)
        .ok_or(StageError::UnknownTransaction { txid: req.txid })?;
    let source = record.source;

    // (a) Ensure history: same-transaction predecessor, then persisted,
    // then a fresh empty clock.
    let persisted_history = req.persisted.as_ref().and_then(|m| m.history.clone());
    let supplied = req
        .metadata
        .history
        .clone()
        .or_else(|| {
            record
                .ops
                .get(&req.id)
                .and_then(|op| op.metadata.history.clone())
        })
        .or_else(|| persisted_history.clone())
        .unwrap_or_default();

    // (b) Classify against the last-known history: the staged
    // current-history wins over whatever storage has.
    let current = state
        .documents
        .get(&req.id)
        .and_then(|d| d.current_history.clone())
        .or(persisted_history);
    let status = classify(source, current.as_ref(), &supplied);

    // (c) Written metadata. Clients advance the clock whatever the status
    // was assigned - conflict records must be distinguishable too. Peers
    // already stamped their history; only the synctag is ours to add.
    let written_history = match source {
        Source::Client => supplied.next(&req.node_tag),
        Source::Replication => supplied,
    };
    let mut metadata = req.metadata;
    metadata.history = Some(written_history.clone());
    metadata.synctag = Some(req.synctag);

    let request = match req.document {
        Some(document) => OpRequest::Add(document),
        None => OpRequest::Delete,
    };
    record.ops.insert(
        req.id.clone(),
        OpRecord {
            request,
            id: req.id.clone(),
            metadata,
            status,
        },
    );

    // (d) Update the staging log. Only the first op anywhere to touch the
    // id - and only a Write - publishes a current-history.
    let first_touch = !state.documents.contains_key(&req.id);
    let staging = state.documents.entry(req.id).or_default();
    if first_touch && status == OpStatus::Write {
        staging.current_history = Some(written_history);
    }
    staging.refs.insert(req.txid);

    Ok(status)
}

/// The classification table. Clients are strict: anything that is not an
/// extension of the last-known history is a conflict. Replication is
/// tolerant: echoes and stale peers are skipped, only true divergence
/// conflicts.
fn classify(source: Source, current: Option<&VClock>, supplied: &VClock) -> OpStatus {
    let Some(current) = current else {
        return OpStatus::Write;
    };
    match source {
        Source::Client => {
            if supplied == current || supplied.descends(current) {
                OpStatus::Write
            } else {
                OpStatus::Conflict
            }
        }
        Source::Replication => {
            if supplied == current {
                OpStatus::Skip
            } else if supplied.descends(current) {
                OpStatus::Write
            } else if current.descends(supplied) {
                OpStatus::Skip
            } else {
                OpStatus::Conflict
            }
        }
    }
}
