use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Reserved identity for the scripted correspondent. Seeded into the store
/// at init so directory lookups always resolve it.
pub const BOT_USER_ID: &str = "bot";
pub const BOT_DISPLAY_NAME: &str = "Tideline Bot";

/// A user as known to the identity collaborator. Looked up, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub email: String,
}

impl User {
    pub fn new(display_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            display_name: display_name.into(),
            email: email.into(),
        }
    }

    pub fn bot() -> Self {
        Self {
            id: BOT_USER_ID.to_string(),
            display_name: BOT_DISPLAY_NAME.to_string(),
            email: String::new(),
        }
    }

    pub fn is_bot(&self) -> bool {
        self.id == BOT_USER_ID
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}
