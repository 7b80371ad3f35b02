//! Event fan-out to subscribers.
//!
//! A single logical producer stream, any number of subscribers, each with
//! its own bounded queue. Publishing never blocks: a subscriber whose
//! queue is full is disconnected rather than allowed to stall writers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use thiserror::Error;

use crate::core::{Limits, TxEvent};
use crate::error::{Effect, Transience};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BroadcasterLimits {
    pub max_subscribers: usize,
}

impl BroadcasterLimits {
    pub fn from_limits(limits: &Limits) -> Self {
        Self {
            max_subscribers: limits.max_broadcast_subscribers,
        }
    }
}

/// Per-subscriber queue bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriberLimits {
    pub max_events: usize,
}

impl SubscriberLimits {
    pub fn new(max_events: usize) -> Result<Self, BroadcastError> {
        if max_events == 0 {
            return Err(BroadcastError::InvalidSubscriberLimits {
                reason: "max_events must be > 0".to_string(),
            });
        }
        Ok(Self { max_events })
    }

    pub fn from_limits(limits: &Limits) -> Self {
        Self {
            max_events: limits.subscriber_queue_events.max(1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    SubscriberLagged,
}

/// One subscriber's view of the event stream, from the moment of
/// subscription forward.
pub struct EventSubscription {
    receiver: Receiver<TxEvent>,
    drop_reason: Arc<Mutex<Option<DropReason>>>,
}

impl EventSubscription {
    pub fn recv(&self) -> Result<TxEvent, crossbeam::channel::RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<TxEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Result<TxEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Why this subscription was disconnected, if it was.
    pub fn drop_reason(&self) -> Option<DropReason> {
        self.drop_reason.lock().ok().and_then(|guard| *guard)
    }
}

#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<Mutex<BroadcasterState>>,
}

impl EventBroadcaster {
    pub fn new(limits: BroadcasterLimits) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BroadcasterState::new(limits))),
        }
    }

    pub fn subscribe(&self, limits: SubscriberLimits) -> Result<EventSubscription, BroadcastError> {
        let mut state = self.lock_state()?;
        if state.subscribers.len() >= state.limits.max_subscribers {
            return Err(BroadcastError::SubscriberLimitReached {
                max_subscribers: state.limits.max_subscribers,
            });
        }

        let (sender, receiver) = crossbeam::channel::bounded(limits.max_events);
        let drop_reason = Arc::new(Mutex::new(None));
        let id = state.next_subscriber_id;
        state.next_subscriber_id = state.next_subscriber_id.saturating_add(1);
        state.subscribers.insert(
            id,
            SubscriberState {
                sender,
                drop_reason: Arc::clone(&drop_reason),
            },
        );

        Ok(EventSubscription {
            receiver,
            drop_reason,
        })
    }

    pub fn publish(&self, event: TxEvent) -> Result<(), BroadcastError> {
        let mut state = self.lock_state()?;

        let mut dropped = Vec::new();
        for (id, subscriber) in &state.subscribers {
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    subscriber.set_drop_reason(DropReason::SubscriberLagged);
                    dropped.push(*id);
                }
                Err(TrySendError::Disconnected(_)) => {
                    dropped.push(*id);
                }
            }
        }

        for id in dropped {
            state.subscribers.remove(&id);
        }

        Ok(())
    }

    pub fn subscriber_count(&self) -> Result<usize, BroadcastError> {
        let state = self.lock_state()?;
        Ok(state.subscribers.len())
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, BroadcasterState>, BroadcastError> {
        self.inner.lock().map_err(|_| BroadcastError::LockPoisoned)
    }
}

struct BroadcasterState {
    limits: BroadcasterLimits,
    next_subscriber_id: u64,
    subscribers: BTreeMap<u64, SubscriberState>,
}

impl BroadcasterState {
    fn new(limits: BroadcasterLimits) -> Self {
        Self {
            limits,
            next_subscriber_id: 1,
            subscribers: BTreeMap::new(),
        }
    }
}

struct SubscriberState {
    sender: Sender<TxEvent>,
    drop_reason: Arc<Mutex<Option<DropReason>>>,
}

impl SubscriberState {
    fn set_drop_reason(&self, reason: DropReason) {
        if let Ok(mut guard) = self.drop_reason.lock() {
            if guard.is_none() {
                *guard = Some(reason);
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("subscriber limit reached ({max_subscribers})")]
    SubscriberLimitReached { max_subscribers: usize },
    #[error("subscriber limits invalid: {reason}")]
    InvalidSubscriberLimits { reason: String },
    #[error("broadcaster lock poisoned")]
    LockPoisoned,
}

impl BroadcastError {
    pub fn transience(&self) -> Transience {
        match self {
            BroadcastError::SubscriberLimitReached { .. } => Transience::Retryable,
            BroadcastError::InvalidSubscriberLimits { .. } => Transience::Permanent,
            BroadcastError::LockPoisoned => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            BroadcastError::SubscriberLimitReached { .. } => Effect::None,
            BroadcastError::InvalidSubscriberLimits { .. } => Effect::None,
            BroadcastError::LockPoisoned => Effect::Unknown,
        }
    }
}
