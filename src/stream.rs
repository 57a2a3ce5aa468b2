use crate::{
    bus::{Event, EventBus},
    chat::{validate_body, Message},
    error::{EngineError, Result},
    store::Store,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;

/// How far apart a local echo and its authoritative row may sit on the clock
/// and still be the same logical message. Ids are server-assigned, so
/// reconciliation goes by conversation + sender + body + approximate time.
const RECONCILE_TOLERANCE_SECS: i64 = 10;

/// Echoes that never reconcile (e.g. nobody re-queried the conversation)
/// are dropped after this long instead of accumulating.
const ECHO_STALE_SECS: i64 = 60;

/// A locally originated send that the authoritative stream has not yet
/// confirmed. Rendered into snapshots so the sender sees their message
/// immediately, discarded once the pushed set contains the real row.
#[derive(Debug, Clone)]
struct PendingSend {
    local_id: String,
    conversation_id: String,
    sender_id: String,
    body: String,
    at: DateTime<Utc>,
}

impl PendingSend {
    fn matches(&self, msg: &Message) -> bool {
        msg.conversation_id == self.conversation_id
            && msg.sender_id == self.sender_id
            && msg.body == self.body
            && (msg.created_at - self.at).num_seconds().abs() <= RECONCILE_TOLERANCE_SECS
    }

    fn echo(&self) -> Message {
        Message {
            id: self.local_id.clone(),
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            body: self.body.clone(),
            created_at: self.at,
        }
    }
}

/// Per-conversation live message sequence. Every delivery is the full
/// ordered set for the conversation (cumulative, not a diff), merged with
/// the not-yet-confirmed local echoes.
#[derive(Clone)]
pub struct MessageStream {
    store: Store,
    bus: Arc<EventBus>,
    pending: Arc<Mutex<Vec<PendingSend>>>,
}

impl MessageStream {
    pub fn new(store: Store, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append a message. The body is validated before any store interaction;
    /// on a failed write the echo is withdrawn and the error surfaces to the
    /// caller (no automatic retry), so the typed input stays put.
    pub async fn send(&self, conversation_id: &str, sender_id: &str, body: &str) -> Result<Message> {
        validate_body(body)?;

        let msg = Message::new(conversation_id, sender_id, body);
        let echo = PendingSend {
            local_id: format!("pending-{}", msg.id),
            conversation_id: msg.conversation_id.clone(),
            sender_id: msg.sender_id.clone(),
            body: msg.body.clone(),
            at: msg.created_at,
        };
        self.pending.lock().unwrap().push(echo.clone());

        match self.store.insert_message(&msg).await {
            Ok(()) => {
                self.bus.publish(Event::MessageAppended(msg.clone()));
                Ok(msg)
            }
            Err(e) => {
                self.pending
                    .lock()
                    .unwrap()
                    .retain(|p| p.local_id != echo.local_id);
                Err(e)
            }
        }
    }

    /// Establish a live subscription. The handle delivers an initial
    /// snapshot, then a fresh full snapshot whenever the conversation
    /// changes. Dropping the handle releases the relay task and its bus
    /// receiver; nothing is delivered after that.
    pub async fn subscribe(&self, conversation_id: &str) -> Result<Subscription> {
        if self.store.get_conversation(conversation_id).await?.is_none() {
            return Err(EngineError::ValidationFailed(format!(
                "unknown conversation: {conversation_id}"
            )));
        }

        let mut bus_rx = self.bus.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let initial = self.snapshot(conversation_id).await?;

        let stream = self.clone();
        let conversation_id = conversation_id.to_string();
        let task = tokio::spawn(async move {
            if tx.send(initial).await.is_err() {
                return;
            }
            loop {
                match bus_rx.recv().await {
                    Ok(Event::MessageAppended(msg)) if msg.conversation_id == conversation_id => {}
                    Ok(_) => continue,
                    // A lagged receiver just resyncs: snapshots are
                    // cumulative, so skipped events cost nothing.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                match stream.snapshot(&conversation_id).await {
                    Ok(snap) => {
                        if tx.send(snap).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("snapshot for {} failed: {}", conversation_id, e);
                    }
                }
            }
        });

        Ok(Subscription { rx, task })
    }

    /// Authoritative rows plus unconfirmed echoes, sorted.
    async fn snapshot(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let authoritative = self.store.conversation_messages(conversation_id).await?;
        let mut pending = self.pending.lock().unwrap();
        Ok(overlay(&authoritative, &mut pending, conversation_id))
    }
}

/// Reconcile the echo overlay against an authoritative set and materialize
/// the snapshot for one conversation. Confirmed and stale echoes are removed
/// from the overlay; the result is sorted by creation time (id as a
/// tiebreaker) and never contains a message twice.
fn overlay(
    authoritative: &[Message],
    pending: &mut Vec<PendingSend>,
    conversation_id: &str,
) -> Vec<Message> {
    let now = Utc::now();
    // Each authoritative row confirms at most one echo. Two rapid sends of
    // the same body are two logical messages; the row for the first must
    // not retire the still-in-flight second.
    let mut claimed = vec![false; authoritative.len()];
    pending.retain(|p| {
        let confirmed = authoritative
            .iter()
            .enumerate()
            .find(|(i, m)| !claimed[*i] && p.matches(m))
            .map(|(i, _)| i);
        if let Some(i) = confirmed {
            claimed[i] = true;
            return false;
        }
        now - p.at <= Duration::seconds(ECHO_STALE_SECS)
    });

    let mut out: Vec<Message> = authoritative.to_vec();
    out.extend(
        pending
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .map(PendingSend::echo),
    );
    out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    out
}

/// A live subscription handle. Drop it to unsubscribe: the relay task is
/// aborted and the underlying bus receiver released, bounding live
/// subscriptions to the handles actually held.
pub struct Subscription {
    rx: mpsc::Receiver<Vec<Message>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Vec<Message>> {
        self.rx.recv().await
    }

    /// Non-blocking drain step for callers that poll.
    pub fn try_recv(&mut self) -> Option<Vec<Message>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Conversation;

    async fn fixture() -> (MessageStream, Store, Arc<EventBus>, Conversation) {
        let store = Store::in_memory().await.unwrap();
        store.init().await.unwrap();
        let conv = Conversation::new("u1", "u2");
        store.insert_conversation(&conv).await.unwrap();
        let bus = Arc::new(EventBus::new());
        let stream = MessageStream::new(store.clone(), bus.clone());
        (stream, store, bus, conv)
    }

    #[tokio::test]
    async fn empty_body_never_reaches_the_store() {
        let (stream, store, _bus, conv) = fixture().await;

        let err = stream.send(&conv.id, "u1", "   ").await.unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
        assert!(store.conversation_messages(&conv.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sent_message_appears_exactly_once_in_next_snapshot() {
        let (stream, _store, _bus, conv) = fixture().await;

        let mut sub = stream.subscribe(&conv.id).await.unwrap();
        assert!(sub.recv().await.unwrap().is_empty());

        stream.send(&conv.id, "u1", "hello").await.unwrap();

        let snapshot = sub.recv().await.unwrap();
        let hits: Vec<_> = snapshot.iter().filter(|m| m.body == "hello").collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].sender_id, "u1");
    }

    #[tokio::test]
    async fn snapshots_are_sorted_and_cumulative() {
        let (stream, _store, _bus, conv) = fixture().await;
        let mut sub = stream.subscribe(&conv.id).await.unwrap();
        sub.recv().await.unwrap();

        for body in ["one", "two", "three"] {
            stream.send(&conv.id, "u1", body).await.unwrap();
        }

        let mut seen: Vec<(String, String)> = Vec::new();
        for _ in 0..3 {
            let snap = sub.recv().await.unwrap();
            assert!(snap.windows(2).all(|w| w[0].created_at <= w[1].created_at));
            // Cumulative over logical messages: an echo's id flips to the
            // server-assigned one on reconciliation, but sender + body
            // never disappear from a later snapshot.
            for (sender, body) in &seen {
                assert!(snap
                    .iter()
                    .any(|n| n.sender_id == *sender && n.body == *body));
            }
            seen = snap
                .iter()
                .map(|m| (m.sender_id.clone(), m.body.clone()))
                .collect();
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn subscribing_to_unknown_conversation_fails_fast() {
        let (stream, _store, _bus, _conv) = fixture().await;
        assert!(matches!(
            stream.subscribe("nope").await,
            Err(EngineError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn dropping_the_handle_releases_the_bus_receiver() {
        let (stream, _store, bus, conv) = fixture().await;
        let baseline = bus.receiver_count();

        let sub = stream.subscribe(&conv.id).await.unwrap();
        assert_eq!(bus.receiver_count(), baseline + 1);

        drop(sub);
        // The abort lands at the relay's next yield point.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(bus.receiver_count(), baseline);

        // Sends after the drop still succeed; nobody is listening.
        stream.send(&conv.id, "u1", "into the void").await.unwrap();
    }

    #[test]
    fn overlay_reconciles_echo_against_authoritative_row() {
        let authoritative = vec![Message::new("c1", "u1", "hello")];
        let mut pending = vec![PendingSend {
            local_id: "pending-1".to_string(),
            conversation_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            body: "hello".to_string(),
            at: authoritative[0].created_at,
        }];

        let snapshot = overlay(&authoritative, &mut pending, "c1");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, authoritative[0].id);
        assert!(pending.is_empty());
    }

    #[test]
    fn overlay_keeps_unconfirmed_echo_visible() {
        let authoritative = vec![Message::new("c1", "u2", "hi")];
        let mut pending = vec![PendingSend {
            local_id: "pending-1".to_string(),
            conversation_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            body: "not yet confirmed".to_string(),
            at: Utc::now(),
        }];

        let snapshot = overlay(&authoritative, &mut pending, "c1");
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().any(|m| m.id == "pending-1"));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn one_row_confirms_at_most_one_of_two_identical_echoes() {
        // Two rapid sends of the same body: the first row has landed, the
        // second is still in flight. The snapshot must keep showing both.
        let authoritative = vec![Message::new("c1", "u1", "hi")];
        let at = authoritative[0].created_at;
        let echo = |local_id: &str| PendingSend {
            local_id: local_id.to_string(),
            conversation_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            body: "hi".to_string(),
            at,
        };
        let mut pending = vec![echo("pending-1"), echo("pending-2")];

        let snapshot = overlay(&authoritative, &mut pending, "c1");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(pending.len(), 1);

        // The second row retires the surviving echo.
        let mut both = authoritative;
        both.push(Message::new("c1", "u1", "hi"));
        let snapshot = overlay(&both, &mut pending, "c1");
        assert_eq!(snapshot.len(), 2);
        assert!(pending.is_empty());
    }

    #[test]
    fn overlay_excludes_other_conversations_echoes() {
        let mut pending = vec![PendingSend {
            local_id: "pending-1".to_string(),
            conversation_id: "c2".to_string(),
            sender_id: "u1".to_string(),
            body: "elsewhere".to_string(),
            at: Utc::now(),
        }];

        let snapshot = overlay(&[], &mut pending, "c1");
        assert!(snapshot.is_empty());
        assert_eq!(pending.len(), 1);
    }
}
