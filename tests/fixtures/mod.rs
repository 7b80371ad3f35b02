#![allow(dead_code)]

//! Shared helpers for integration tests.

use std::sync::Arc;

use vellum::{
    DocId, Document, DocumentMetadata, Inflight, MemoryStore, ServerId, Source, VClock,
};

pub fn server_id() -> ServerId {
    ServerId::new("srv-1").unwrap()
}

pub fn handle() -> (Arc<MemoryStore>, Inflight<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let inflight = Inflight::new(Arc::clone(&store), server_id());
    (store, inflight)
}

pub fn doc_id(s: &str) -> DocId {
    DocId::new(s).unwrap()
}

pub fn body(s: &str) -> Document {
    Document::new(s.as_bytes().to_vec())
}

/// Commit a client write so the store holds a persisted history for `id`,
/// and return that history.
pub fn seed_document(
    inflight: &Inflight<MemoryStore>,
    store: &MemoryStore,
    id: &DocId,
    text: &str,
) -> VClock {
    let tx = inflight.open(Source::Client).unwrap();
    inflight
        .add_document(tx, id.clone(), body(text), DocumentMetadata::default())
        .unwrap();
    inflight.complete(tx).unwrap();
    store
        .document(id)
        .expect("seeded document")
        .metadata
        .history
        .expect("seeded history")
}
