//! Event bus implementation using tokio broadcast channels

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{Event, EventEnvelope};

/// Capacity for the broadcast channel
const DEFAULT_CAPACITY: usize = 1000;

/// Event bus for publishing and subscribing to events.
///
/// Every published event is wrapped in an [`EventEnvelope`] carrying a
/// monotonically increasing sequence number shared by all clones of the bus.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of subscribers that received the event.
    /// If there are no subscribers, returns 0 (the event is dropped).
    pub fn publish(&self, event: Event) -> usize {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.sender
            .send(EventEnvelope::new(sequence, event))
            .unwrap_or(0)
    }

    /// Subscribe to events
    ///
    /// Returns a receiver that will receive all published events.
    /// Note: Events published before subscribing will not be received.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Subscribe to the events of a single session.
    pub fn subscribe_session(&self, session_id: Uuid) -> SessionSubscription {
        SessionSubscription {
            session_id,
            receiver: self.sender.subscribe(),
        }
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the total number of events published
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .field("event_count", &self.event_count())
            .finish()
    }
}

/// Receiver that only yields events for one session.
pub struct SessionSubscription {
    session_id: Uuid,
    receiver: broadcast::Receiver<EventEnvelope>,
}

impl SessionSubscription {
    /// Wait for the next event of this session.
    ///
    /// Lagged receivers skip ahead; `None` means the bus is gone.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.event.session_id() == self.session_id => {
                    return Some(envelope)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}
