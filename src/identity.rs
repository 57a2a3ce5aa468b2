use crate::entity::User;
use crate::error::{EngineError, Result};
use tokio::sync::watch;
use tracing::info;

/// Session context: the currently authenticated user plus a change feed.
///
/// Passed to components as an explicit dependency rather than looked up
/// globally. Sign-out clears the value; consumers watching the feed tear
/// down their live subscriptions and caches when it flips to `None`.
#[derive(Debug)]
pub struct Identity {
    current: watch::Sender<Option<User>>,
}

impl Identity {
    pub fn new() -> Self {
        let (current, _rx) = watch::channel(None);
        Self { current }
    }

    pub fn sign_in(&self, user: User) {
        info!("session signed in: {}", user);
        let _ = self.current.send(Some(user));
    }

    pub fn sign_out(&self) {
        info!("session signed out");
        let _ = self.current.send(None);
    }

    pub fn current_user(&self) -> Option<User> {
        self.current.borrow().clone()
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.current.borrow().as_ref().map(|u| u.id.clone())
    }

    /// No active session is `AuthRequired`, surfaced as a redirect-to-signin
    /// condition by callers, never a crash.
    pub fn require_user(&self) -> Result<User> {
        self.current_user().ok_or(EngineError::AuthRequired)
    }

    /// Change feed delivering sign-in/sign-out transitions.
    pub fn watch(&self) -> watch::Receiver<Option<User>> {
        self.current.subscribe()
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}
