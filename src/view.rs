use crate::{
    chat::{Conversation, Message},
    directory::Directory,
    entity::User,
    error::Result,
    stream::{MessageStream, Subscription},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// What the inbox pane renders for one conversation.
#[derive(Debug, Clone, Serialize)]
pub struct InboxEntry {
    pub conversation_id: String,
    pub label: String,
    pub selected: bool,
    pub last_active_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptLine {
    pub sender_label: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    /// True when the current user sent it (rendered on the other side).
    pub own: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderModel {
    pub inbox: Vec<InboxEntry>,
    pub transcript: Vec<TranscriptLine>,
    pub input_enabled: bool,
}

/// Composes the registry list, the live transcript and the selection state
/// into what the user currently sees. Everything here is derived or
/// transient; nothing is persisted, and sign-out resets it all.
pub struct ViewController {
    stream: MessageStream,
    selected: Option<String>,
    subscription: Option<Subscription>,
    transcript: Vec<Message>,
    search_query: String,
    search_results: Vec<User>,
    send_in_flight: bool,
}

impl ViewController {
    pub fn new(stream: MessageStream) -> Self {
        Self {
            stream,
            selected: None,
            subscription: None,
            transcript: Vec::new(),
            search_query: String::new(),
            search_results: Vec::new(),
            send_in_flight: false,
        }
    }

    /// Change the selection. The previous subscription is dropped BEFORE the
    /// new one is established, so at most one live subscription exists per
    /// mounted view and a deselected conversation delivers nothing further.
    pub async fn select(&mut self, conversation_id: Option<&str>) -> Result<()> {
        self.subscription = None;
        self.transcript.clear();
        self.selected = None;

        if let Some(id) = conversation_id {
            let mut sub = self.stream.subscribe(id).await?;
            if let Some(initial) = sub.recv().await {
                self.transcript = initial;
            }
            self.subscription = Some(sub);
            self.selected = Some(id.to_string());
        }
        Ok(())
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Drain any snapshots the live subscription has delivered since the
    /// last call. Each snapshot is complete, so only the latest matters.
    pub fn pump(&mut self) {
        if let Some(sub) = self.subscription.as_mut() {
            while let Some(snapshot) = sub.try_recv() {
                self.transcript = snapshot;
            }
        }
    }

    pub fn set_search(&mut self, query: impl Into<String>, results: Vec<User>) {
        self.search_query = query.into();
        self.search_results = results;
    }

    pub fn search_results(&self) -> &[User] {
        &self.search_results
    }

    pub fn begin_send(&mut self) {
        self.send_in_flight = true;
    }

    pub fn finish_send(&mut self) {
        self.send_in_flight = false;
    }

    /// Sign-out path: drop the subscription and every piece of transient
    /// state.
    pub fn reset(&mut self) {
        self.subscription = None;
        self.selected = None;
        self.transcript.clear();
        self.search_query.clear();
        self.search_results.clear();
        self.send_in_flight = false;
    }

    /// Produce the renderable triple from the current inputs. Input is
    /// disabled while nothing is selected or a send is in flight.
    pub fn render(
        &self,
        conversations: &[Conversation],
        directory: &Directory,
        current_user_id: Option<&str>,
    ) -> RenderModel {
        let inbox = conversations
            .iter()
            .map(|conv| {
                let label = current_user_id
                    .and_then(|me| conv.peer_of(me))
                    .map(|peer| directory.display_name(peer))
                    .unwrap_or_else(|| "Untitled Chat".to_string());
                InboxEntry {
                    conversation_id: conv.id.clone(),
                    label,
                    selected: self.selected.as_deref() == Some(conv.id.as_str()),
                    last_active_at: conv.last_active_at,
                }
            })
            .collect();

        let transcript = self
            .transcript
            .iter()
            .map(|msg| TranscriptLine {
                sender_label: directory.display_name(&msg.sender_id),
                body: msg.body.clone(),
                sent_at: msg.created_at,
                own: current_user_id == Some(msg.sender_id.as_str()),
            })
            .collect();

        RenderModel {
            inbox,
            transcript,
            input_enabled: self.selected.is_some() && !self.send_in_flight,
        }
    }
}
