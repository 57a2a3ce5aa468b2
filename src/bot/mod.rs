pub mod reply;

use crate::{
    chat::{validate_body, Conversation, Message},
    entity::BOT_USER_ID,
    error::{EngineError, Result},
    registry::Registry,
    stream::MessageStream,
};
use reply::ReplyClient;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Turn-taking state for one user's bot conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BotTurnState {
    NoBotConversation,
    BotConversationReady,
    AwaitingReply,
}

struct BotUserSession {
    /// Single-flight guard: turns for one user are serialized, a second
    /// `send_to_bot` waits for the in-flight turn instead of interleaving.
    turn: tokio::sync::Mutex<()>,
    state: Mutex<BotTurnState>,
    conversation: Mutex<Option<Conversation>>,
}

impl BotUserSession {
    fn new() -> Self {
        Self {
            turn: tokio::sync::Mutex::new(()),
            state: Mutex::new(BotTurnState::NoBotConversation),
            conversation: Mutex::new(None),
        }
    }
}

/// Maintains exactly one conversation per user with the reserved bot
/// identity and sequences user-message → external-reply → bot-message as one
/// logical turn.
pub struct BotSessionManager {
    registry: Arc<Registry>,
    stream: MessageStream,
    reply: ReplyClient,
    sessions: Mutex<HashMap<String, Arc<BotUserSession>>>,
}

impl BotSessionManager {
    pub fn new(registry: Arc<Registry>, stream: MessageStream, reply: ReplyClient) -> Self {
        Self {
            registry,
            stream,
            reply,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn session(&self, user_id: &str) -> Arc<BotUserSession> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(BotUserSession::new()))
            .clone()
    }

    /// Look up (or lazily create) the user's bot conversation. Idempotent:
    /// once ready, repeated calls return the cached conversation.
    pub async fn ensure_conversation(&self, user_id: Option<&str>) -> Result<Conversation> {
        let user_id = user_id.ok_or(EngineError::AuthRequired)?;
        let session = self.session(user_id);

        if let Some(conv) = session.conversation.lock().unwrap().clone() {
            return Ok(conv);
        }

        let conv = self
            .registry
            .find_or_create_conversation(Some(user_id), BOT_USER_ID)
            .await?;
        info!("bot conversation {} ready for {}", conv.id, user_id);

        *session.conversation.lock().unwrap() = Some(conv.clone());
        *session.state.lock().unwrap() = BotTurnState::BotConversationReady;
        Ok(conv)
    }

    /// One bot turn: append the user's message, call the reply service,
    /// append the bot's reply. A failure after the user message leaves that
    /// message in place (it is truth regardless of bot availability) and
    /// returns the manager to `BotConversationReady`.
    pub async fn send_to_bot(&self, user_id: Option<&str>, text: &str) -> Result<Message> {
        let user_id = user_id.ok_or(EngineError::AuthRequired)?.to_string();
        validate_body(text)?;

        let session = self.session(&user_id);
        let _turn = session.turn.lock().await;

        let conv = self.ensure_conversation(Some(&user_id)).await?;
        *session.state.lock().unwrap() = BotTurnState::AwaitingReply;

        if let Err(e) = self.stream.send(&conv.id, &user_id, text).await {
            *session.state.lock().unwrap() = BotTurnState::BotConversationReady;
            return Err(e);
        }

        let result = match self.reply.generate(text).await {
            Ok(reply_text) => self.stream.send(&conv.id, BOT_USER_ID, &reply_text).await,
            Err(e) => {
                warn!("bot turn for {} abandoned: {}", user_id, e);
                Err(e)
            }
        };

        *session.state.lock().unwrap() = BotTurnState::BotConversationReady;
        result
    }

    pub fn state(&self, user_id: &str) -> BotTurnState {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(user_id)
            .map(|s| *s.state.lock().unwrap())
            .unwrap_or(BotTurnState::NoBotConversation)
    }
}
