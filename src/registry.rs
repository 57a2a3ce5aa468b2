use crate::{
    bus::{Event, EventBus},
    chat::Conversation,
    entity::User,
    error::{EngineError, Result},
    store::Store,
};
use std::sync::Arc;
use tracing::info;

/// Derives the set of conversations a user participates in and owns the
/// create-or-reuse path for starting new ones.
pub struct Registry {
    store: Store,
    bus: Arc<EventBus>,
}

impl Registry {
    pub fn new(store: Store, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Inbox for the given user, most recent activity first. An absent user
    /// id means no session: `AuthRequired`. Store failures propagate as
    /// `UpstreamUnavailable`, never retried here.
    pub async fn list_conversations(&self, user_id: Option<&str>) -> Result<Vec<Conversation>> {
        let user_id = user_id.ok_or(EngineError::AuthRequired)?;
        self.store.list_conversations(user_id).await
    }

    /// Locate the conversation for the unordered pair, creating it only if
    /// absent. The pair is stored in canonical order under a unique index,
    /// so two near-simultaneous callers converge on the same row: the loser
    /// of the insert re-selects the winner.
    pub async fn find_or_create_conversation(
        &self,
        user_id: Option<&str>,
        other_user_id: &str,
    ) -> Result<Conversation> {
        let user_id = user_id.ok_or(EngineError::AuthRequired)?;
        if user_id == other_user_id {
            return Err(EngineError::ValidationFailed(
                "cannot start a conversation with yourself".to_string(),
            ));
        }

        if let Some(existing) = self.store.find_conversation(user_id, other_user_id).await? {
            return Ok(existing);
        }

        let candidate = Conversation::new(user_id, other_user_id);
        let created = self.store.insert_conversation(&candidate).await?;

        let conversation = self
            .store
            .find_conversation(user_id, other_user_id)
            .await?
            .ok_or_else(|| {
                EngineError::UpstreamUnavailable(
                    "conversation missing immediately after insert".to_string(),
                )
            })?;

        if created {
            info!(
                "conversation {} created between {} and {}",
                conversation.id, conversation.participant_a, conversation.participant_b
            );
            // Refreshes inbox views without requiring navigation.
            self.bus
                .publish(Event::ConversationCreated(conversation.clone()));
        }

        Ok(conversation)
    }

    /// Register a user row in the store's projection. A blank display name
    /// is rejected before any store write.
    pub async fn register_user(&self, display_name: &str, email: &str) -> Result<User> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(EngineError::ValidationFailed(
                "display name is empty".to_string(),
            ));
        }

        let user = User::new(display_name, email);
        self.store.save_user(&user).await?;
        info!("registered user {}", user);
        Ok(user)
    }

    /// Case-insensitive substring match on display name. An empty or
    /// whitespace query yields an empty set, never an implicit "list all".
    pub async fn search_users(&self, query: &str) -> Result<Vec<User>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.store.search_users(query).await
    }
}
