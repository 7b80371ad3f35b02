//! Fan-out safety limits (normative defaults).

use serde::{Deserialize, Serialize};

/// Bounds on the event broadcaster.
///
/// Values are explicit about their units to avoid confusion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_broadcast_subscribers: usize,
    pub subscriber_queue_events: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_broadcast_subscribers: 256,
            subscriber_queue_events: 8_192,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Limits;

    #[test]
    fn limits_defaults_are_pinned() {
        let limits = Limits::default();
        assert_eq!(limits.max_broadcast_subscribers, 256);
        assert_eq!(limits.subscriber_queue_events, 8_192);
    }
}
