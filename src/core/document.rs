//! Layer 3: Documents and their metadata
//!
//! The manager treats document bodies as opaque bytes; only the metadata
//! envelope (history, synctag, pass-through user entries) is interpreted.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::identity::SyncTag;
use super::vclock::VClock;

/// Opaque document payload. Never inspected, cheaply cloneable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Bytes);

impl Document {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Metadata carried by every staged operation and persisted document.
///
/// `history` and `synctag` are the recognized entries; anything else the
/// caller supplies rides along untouched in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<VClock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synctag: Option<SyncTag>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DocumentMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: VClock) -> Self {
        Self {
            history: Some(history),
            ..Self::default()
        }
    }
}

/// What a conflict record stores: the conflicting document, or the deleted
/// sentinel when the conflicting operation was a delete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictBody {
    Document(Document),
    Deleted,
}
