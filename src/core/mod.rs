//! Core domain types for vellum (Layers 0-5)
//!
//! Module hierarchy follows type dependency order:
//! - identity: ServerId, DocId, TxId, NodeTag, SyncTag (Layer 0)
//! - vclock: causal-history algebra (Layer 1)
//! - domain: Source, OpStatus (Layer 2)
//! - document: Document, DocumentMetadata, ConflictBody (Layer 3)
//! - event: TxEvent lifecycle events (Layer 4)
//! - limits: fan-out safety limits (Layer 5)

pub mod document;
pub mod domain;
pub mod error;
pub mod event;
pub mod identity;
pub mod limits;
pub mod vclock;

pub use document::{ConflictBody, Document, DocumentMetadata};
pub use domain::{OpStatus, Source};
pub use error::{CoreError, InvalidId};
pub use event::TxEvent;
pub use identity::{DocId, NodeTag, ServerId, SyncTag, TxId};
pub use limits::Limits;
pub use vclock::VClock;
