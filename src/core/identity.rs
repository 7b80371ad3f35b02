//! Layer 0: Identity atoms
//!
//! ServerId: this node's identity, seeds client-side history advances
//! DocId: opaque document identifier
//! TxId: process-local transaction identifier
//! NodeTag: one writer slot in a vector clock
//! SyncTag: globally monotonic storage stamp

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{CoreError, InvalidId};

/// Server identifier - non-empty string naming this node.
///
/// Combined with a transaction id it yields the [`NodeTag`] under which
/// client writes advance a document's vector clock.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() {
            Err(InvalidId::Server {
                raw: s,
                reason: "empty".into(),
            }
            .into())
        } else {
            Ok(Self(s))
        }
    }

    /// A fresh random server identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The vector-clock slot a given transaction on this node writes under.
    ///
    /// Distinct per transaction so two concurrent client transactions on the
    /// same node never collapse into one causal slot.
    pub fn tag_for(&self, txid: TxId) -> NodeTag {
        NodeTag(format!("{}:{}", self.0, txid))
    }
}

impl fmt::Debug for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerId({:?})", self.0)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Document identifier - opaque non-empty string.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() {
            Err(InvalidId::Document {
                raw: s,
                reason: "empty".into(),
            }
            .into())
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocId({:?})", self.0)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction identifier - strictly positive, never reused within a
/// handle's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(u64);

impl TxId {
    /// Parse an externally supplied id. Zero is not a valid transaction id.
    pub fn from_u64(n: u64) -> Option<Self> {
        if n == 0 { None } else { Some(Self(n)) }
    }

    pub(crate) const fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One writer slot in a vector clock.
///
/// Client transactions write under `server:txid`; replication peers supply
/// their own tags inside already-stamped histories.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeTag(String);

impl NodeTag {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() {
            Err(InvalidId::NodeTag {
                raw: s,
                reason: "empty".into(),
            }
            .into())
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeTag({:?})", self.0)
    }
}

impl fmt::Display for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally monotonic stamp allocated by the storage engine for every
/// mutation; downstream indexers and replicators diff against a watermark.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncTag(u64);

impl SyncTag {
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SyncTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_id_rejects_empty() {
        assert!(ServerId::new("").is_err());
        assert!(ServerId::new("srv-1").is_ok());
    }

    #[test]
    fn generated_server_ids_differ() {
        assert_ne!(ServerId::generate(), ServerId::generate());
    }

    #[test]
    fn doc_id_rejects_empty() {
        assert!(DocId::new("").is_err());
        assert_eq!(DocId::new("doc-1").unwrap().as_str(), "doc-1");
    }

    #[test]
    fn txid_zero_is_invalid() {
        assert!(TxId::from_u64(0).is_none());
        assert_eq!(TxId::from_u64(7).unwrap().as_u64(), 7);
    }

    #[test]
    fn tag_for_is_distinct_per_transaction() {
        let server = ServerId::new("srv-1").unwrap();
        let t1 = TxId::from_u64(1).unwrap();
        let t2 = TxId::from_u64(2).unwrap();
        assert_ne!(server.tag_for(t1), server.tag_for(t2));
        assert_eq!(server.tag_for(t1), server.tag_for(t1));
    }
}
