//! Layer 2: Domain enums
//!
//! Source: where a transaction came from (client vs replication)
//! OpStatus: how a staged operation classified against known history

use serde::{Deserialize, Serialize};

/// Origin of a transaction.
///
/// Client writes are classified strictly: a stale supplied history is a
/// conflict the user must see. Replication is tolerant: a peer that is
/// behind or merely echoing is dropped silently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Client,
    Replication,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Replication => "replication",
        }
    }
}

/// Classification of a staged operation against the last-known history.
///
/// Assigned once at staging time and never revisited; `Conflict` is an
/// in-band status that materializes as a conflict record, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    /// Applies to storage as a regular write.
    Write,
    /// No storage change and no event.
    Skip,
    /// Stored as a conflict record for later resolution.
    Conflict,
}

impl OpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Skip => "skip",
            Self::Conflict => "conflict",
        }
    }
}
