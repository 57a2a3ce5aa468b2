use crate::error::Result;
use crate::store::Store;
use std::collections::HashMap;
use tracing::info;

/// Session-scoped id → display-name lookup table. Loaded once after sign-in
/// and read-only from then on; no component mutates it.
#[derive(Debug, Clone)]
pub struct Directory {
    names: HashMap<String, String>,
}

impl Directory {
    pub async fn load(store: &Store) -> Result<Self> {
        let users = store.list_users().await?;
        info!("directory cache loaded with {} users", users.len());
        let names = users
            .into_iter()
            .map(|u| (u.id, u.display_name))
            .collect();
        Ok(Self { names })
    }

    /// Unknown ids fall back to the raw id so rendering never blocks on a
    /// missing directory entry.
    pub fn display_name(&self, user_id: &str) -> String {
        self.names
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| user_id.to_string())
    }

    pub fn entries(&self) -> &HashMap<String, String> {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::User;

    #[tokio::test]
    async fn resolves_known_ids_and_falls_back_on_unknown() {
        let store = Store::in_memory().await.unwrap();
        store.init().await.unwrap();
        let alice = User::new("Alice", "alice@example.com");
        store.save_user(&alice).await.unwrap();
        store.save_user(&User::bot()).await.unwrap();

        let directory = Directory::load(&store).await.unwrap();
        assert_eq!(directory.display_name(&alice.id), "Alice");
        assert_eq!(directory.display_name("bot"), crate::entity::BOT_DISPLAY_NAME);
        assert_eq!(directory.display_name("ghost"), "ghost");
    }
}
