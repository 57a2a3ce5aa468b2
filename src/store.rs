use crate::{
    chat::{canonical_pair, Conversation, Message},
    entity::User,
    error::Result,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    ConnectOptions, Row, SqlitePool,
};
use std::{path::Path, str::FromStr};

/// SQLite-backed projection of the external data store. Rows are read into
/// explicit records; a row missing a required field is a store error, never
/// a silent default.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    crate::error::EngineError::UpstreamUnavailable(format!(
                        "failed to create database directory: {e}"
                    ))
                })?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options).await?;

        Ok(Self { pool })
    }

    /// In-memory store for tests. A single connection keeps every query on
    /// the same ephemeral database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Initialize the database schema.
    ///
    /// The UNIQUE index on the canonical participant pair is the guard that
    /// makes find-or-create converge under concurrent callers: the insert
    /// side uses ON CONFLICT DO NOTHING and re-selects the winning row.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                email TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                participant_a TEXT NOT NULL,
                participant_b TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                last_active_at DATETIME NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_pair
                ON conversations(participant_a, participant_b);
            CREATE INDEX IF NOT EXISTS idx_conversations_activity
                ON conversations(last_active_at DESC);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
                ON messages(conversation_id, created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or refresh a user row. Idempotent on id.
    pub async fn save_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, email)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                email = excluded.email
            "#,
        )
        .bind(&user.id)
        .bind(&user.display_name)
        .bind(&user.email)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, display_name, email FROM users WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| read_user(&r)).transpose()
    }

    /// Full user set, for the session directory cache.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(
            r#"
            SELECT id, display_name, email FROM users ORDER BY display_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(read_user).collect()
    }

    /// Case-insensitive substring match on display name. The caller is
    /// responsible for rejecting empty queries; this always filters.
    /// LIKE metacharacters in the query are escaped, so `%` and `_` match
    /// only themselves.
    pub async fn search_users(&self, query: &str) -> Result<Vec<User>> {
        let escaped = query
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let rows = sqlx::query(
            r#"
            SELECT id, display_name, email
            FROM users
            WHERE lower(display_name) LIKE '%' || lower(?) || '%' ESCAPE '\'
            ORDER BY display_name
            "#,
        )
        .bind(escaped)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(read_user).collect()
    }

    /// Point query for the unordered pair. Callers pass any order; the pair
    /// is canonicalized here.
    pub async fn find_conversation(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<Conversation>> {
        let (a, b) = canonical_pair(user_a, user_b);
        let row = sqlx::query(
            r#"
            SELECT id, participant_a, participant_b, created_at, last_active_at
            FROM conversations
            WHERE participant_a = ? AND participant_b = ?
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| read_conversation(&r)).transpose()
    }

    /// Insert a conversation, yielding to a concurrent winner on the pair
    /// index. Returns true when this call created the row.
    pub async fn insert_conversation(&self, conv: &Conversation) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversations (id, participant_a, participant_b, created_at, last_active_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(participant_a, participant_b) DO NOTHING
            "#,
        )
        .bind(&conv.id)
        .bind(&conv.participant_a)
        .bind(&conv.participant_b)
        .bind(conv.created_at)
        .bind(conv.last_active_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, participant_a, participant_b, created_at, last_active_at
            FROM conversations
            WHERE id = ?
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| read_conversation(&r)).transpose()
    }

    /// Conversations the user participates in, most recent activity first.
    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, participant_a, participant_b, created_at, last_active_at
            FROM conversations
            WHERE participant_a = ? OR participant_b = ?
            ORDER BY last_active_at DESC, id
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(read_conversation).collect()
    }

    /// Append a message and bump the conversation's activity timestamp in
    /// one transaction, so inbox ordering never lags the transcript.
    pub async fn insert_message(&self, msg: &Message) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, body, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.conversation_id)
        .bind(&msg.sender_id)
        .bind(&msg.body)
        .bind(msg.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversations SET last_active_at = ? WHERE id = ?
            "#,
        )
        .bind(msg.created_at)
        .bind(&msg.conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Full ordered message set for a conversation, oldest first. Ties on
    /// the timestamp fall back to id so the order is total.
    pub async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, sender_id, body, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(read_message).collect()
    }
}

fn read_user(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        email: row.try_get("email")?,
    })
}

fn read_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        participant_a: row.try_get("participant_a")?,
        participant_b: row.try_get("participant_b")?,
        created_at: row.try_get("created_at")?,
        last_active_at: row.try_get("last_active_at")?,
    })
}

fn read_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    async fn store() -> Store {
        let store = Store::in_memory().await.unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn save_and_get_user_roundtrip() {
        let store = store().await;
        let user = User::new("Alice", "alice@example.com");
        store.save_user(&user).await.unwrap();

        let found = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(found, user);
        assert!(store.get_user("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conversation_pair_is_unique() {
        let store = store().await;

        let first = Conversation::new("u1", "u2");
        assert!(store.insert_conversation(&first).await.unwrap());

        // Same pair in either order loses the insert and finds the original.
        let second = Conversation::new("u2", "u1");
        assert!(!store.insert_conversation(&second).await.unwrap());

        let found = store.find_conversation("u2", "u1").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn messages_come_back_oldest_first() {
        let store = store().await;
        let conv = Conversation::new("u1", "u2");
        store.insert_conversation(&conv).await.unwrap();

        let base = Utc::now();
        for (i, body) in ["first", "second", "third"].iter().enumerate() {
            let mut msg = Message::new(&conv.id, "u1", *body);
            msg.created_at = base + Duration::seconds(i as i64);
            store.insert_message(&msg).await.unwrap();
        }

        let messages = store.conversation_messages(&conv.id).await.unwrap();
        let bodies: Vec<&str> = messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn appending_a_message_bumps_activity() {
        let store = store().await;

        let mut older = Conversation::new("u1", "u2");
        older.last_active_at = Utc::now() - Duration::hours(2);
        older.created_at = older.last_active_at;
        let mut newer = Conversation::new("u1", "u3");
        newer.last_active_at = Utc::now() - Duration::hours(1);
        newer.created_at = newer.last_active_at;
        store.insert_conversation(&older).await.unwrap();
        store.insert_conversation(&newer).await.unwrap();

        let listed = store.list_conversations("u1").await.unwrap();
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);

        // New message in the older conversation moves it to the top.
        store
            .insert_message(&Message::new(&older.id, "u2", "ping"))
            .await
            .unwrap();

        let listed = store.list_conversations("u1").await.unwrap();
        assert_eq!(listed[0].id, older.id);
    }

    #[tokio::test]
    async fn search_matches_substring_case_insensitively() {
        let store = store().await;
        store
            .save_user(&User::new("Alice Johnson", "alice@example.com"))
            .await
            .unwrap();
        store
            .save_user(&User::new("Bob", "bob@example.com"))
            .await
            .unwrap();

        let hits = store.search_users("john").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].display_name, "Alice Johnson");
    }

    #[tokio::test]
    async fn search_treats_like_metacharacters_literally() {
        let store = store().await;
        store
            .save_user(&User::new("Agent 100%", "agent@example.com"))
            .await
            .unwrap();
        store
            .save_user(&User::new("Plain Name", "plain@example.com"))
            .await
            .unwrap();

        let hits = store.search_users("100%").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].display_name, "Agent 100%");

        // A bare wildcard matches nothing unless the name contains it.
        assert!(store.search_users("_").await.unwrap().is_empty());
        assert_eq!(store.search_users("%").await.unwrap().len(), 1);
    }
}
