use crate::chat::{Conversation, Message};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Push notifications that keep derived views live. Payloads are hints;
/// subscribers re-query the store for the authoritative state, so a lagged
/// receiver only costs an extra query, never a lost message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// A message was appended to a conversation.
    MessageAppended(Message),

    /// A conversation was created; inbox views refresh without navigation.
    ConversationCreated(Conversation),
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }

    /// Number of live receivers. Lets callers observe that unsubscribing
    /// actually released the underlying channel.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
