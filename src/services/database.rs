use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task;

use super::settings::{AppSettings, SettingsPatch, SettingsService};
use super::store::ConversationStore;
use crate::models::{Conversation, Message, MessageStatus, Role};

const CURRENT_CONVERSATION_KEY: &str = "current_conversation_id";

/// Ordered schema steps. Step `n` brings the schema to version `n + 1`.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE conversations (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE TABLE settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE INDEX idx_conversations_recent ON conversations(updated_at DESC);
    CREATE INDEX idx_messages_order ON messages(conversation_id, position);",
    "ALTER TABLE messages ADD COLUMN thinking TEXT;
    ALTER TABLE messages ADD COLUMN status TEXT;",
];

const CONVERSATION_COLUMNS: &str = "id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, role, content, thinking, status, created_at";

/// SQLite-backed conversation store. A single connection sits behind a
/// mutex; every query runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub async fn open(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        let conn = task::spawn_blocking(move || -> Result<Connection> {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Cannot create {}", dir.display()))?;
            }
            let conn = Connection::open(&path)
                .with_context(|| format!("Cannot open database {}", path.display()))?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Ok(conn)
        })
        .await??;
        Self::from_connection(conn)
    }

    /// Fresh database that lives only as long as the returned handle.
    pub fn new_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow!("Database connection lock poisoned"))?;
            f(&mut guard)
        })
        .await?
    }

    // --- Conversations ---

    /// Every conversation with its messages, most recently updated first.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.blocking(|conn| {
            let conn: &Connection = conn;
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations ORDER BY updated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let headers: Vec<Conversation> = stmt
                .query_map([], read_conversation)?
                .collect::<rusqlite::Result<_>>()?;
            headers
                .into_iter()
                .map(|conv| with_messages(conn, conv))
                .collect()
        })
        .await
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            let conn: &Connection = conn;
            let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
            let header = conn
                .query_row(&sql, params![id], read_conversation)
                .optional()?;
            header.map(|conv| with_messages(conn, conv)).transpose()
        })
        .await
    }

    /// Upsert the conversation row and rewrite its messages in order.
    pub async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let conv = conversation.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET title = excluded.title, updated_at = excluded.updated_at",
                params![
                    conv.id,
                    conv.title,
                    timestamp(&conv.created_at),
                    timestamp(&conv.updated_at),
                ],
            )?;
            tx.execute("DELETE FROM messages WHERE conversation_id = ?1", [&conv.id])?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO messages (id, conversation_id, position, role, content, thinking, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for (position, msg) in conv.messages.iter().enumerate() {
                    insert.execute(params![
                        msg.id,
                        conv.id,
                        position as i64,
                        msg.role.as_str(),
                        msg.content,
                        msg.thinking,
                        msg.status.map(|s| s.as_str()),
                        timestamp(&msg.created_at),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Messages go with it through the cascade.
    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        let id = id.to_owned();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM conversations WHERE id = ?1", [id])?;
            Ok(())
        })
        .await
    }

    // --- Settings ---

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_owned();
        self.blocking(move |conn| {
            let value = conn
                .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
                .optional()?;
            Ok(value)
        })
        .await
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_owned(), value.to_owned());
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_setting(&self, key: &str) -> Result<()> {
        let key = key.to_owned();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
            Ok(())
        })
        .await
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;
    let applied: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    for (step, sql) in MIGRATIONS.iter().enumerate().skip(applied.max(0) as usize) {
        let version = step as i64 + 1;
        conn.execute_batch(sql)
            .with_context(|| format!("Schema migration {} failed", version))?;
        conn.execute("DELETE FROM schema_version", [])?;
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        tracing::debug!("Database schema at version {}", version);
    }
    Ok(())
}

fn with_messages(conn: &Connection, mut conv: Conversation) -> Result<Conversation> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 ORDER BY position"
    );
    let mut stmt = conn.prepare(&sql)?;
    conv.messages = stmt
        .query_map([&conv.id], read_message)?
        .collect::<rusqlite::Result<_>>()?;
    Ok(conv)
}

fn read_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        messages: Vec::new(),
        created_at: parse_timestamp(row, 2)?,
        updated_at: parse_timestamp(row, 3)?,
    })
}

fn read_message(row: &Row) -> rusqlite::Result<Message> {
    let role: String = row.get(1)?;
    let status: Option<String> = row.get(4)?;
    Ok(Message {
        id: row.get(0)?,
        role: Role::from_str(&role).ok_or_else(|| invalid_text(1, format!("role {role}")))?,
        content: row.get(2)?,
        thinking: row.get(3)?,
        status: status
            .map(|s| MessageStatus::from_str(&s).ok_or_else(|| invalid_text(4, format!("status {s}"))))
            .transpose()?,
        created_at: parse_timestamp(row, 5)?,
    })
}

fn parse_timestamp(row: &Row, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e)))
}

fn invalid_text(column: usize, what: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        anyhow!("unknown {}", what).into(),
    )
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl ConversationStore for Database {
    async fn get_all(&self) -> Result<Vec<Conversation>> {
        self.list_conversations().await
    }

    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        self.get_conversation(id).await
    }

    async fn create(&self) -> Result<Conversation> {
        let conversation = Conversation::new();
        self.save_conversation(&conversation).await?;
        self.set_current_id(Some(&conversation.id)).await?;
        Ok(conversation)
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.save_conversation(conversation).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.delete_conversation(id).await?;
        if self.current_id().await?.as_deref() == Some(id) {
            self.set_current_id(None).await?;
        }
        Ok(())
    }

    async fn current_id(&self) -> Result<Option<String>> {
        self.get_setting(CURRENT_CONVERSATION_KEY).await
    }

    async fn set_current_id(&self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => self.set_setting(CURRENT_CONVERSATION_KEY, id).await,
            None => self.delete_setting(CURRENT_CONVERSATION_KEY).await,
        }
    }

    async fn load_settings(&self) -> Result<AppSettings> {
        Ok(SettingsService::load(self).await)
    }

    async fn update_settings(&self, patch: &SettingsPatch) -> Result<AppSettings> {
        SettingsService::update(self, patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation_with_exchange() -> Conversation {
        let mut conv = Conversation::new();
        conv.title = "Test Chat".to_string();
        conv.messages.push(Message::user("Hello!"));
        let mut reply = Message::assistant_placeholder();
        reply.content = "Hi there".to_string();
        reply.thinking = Some("greet back".to_string());
        reply.status = Some(MessageStatus::Complete);
        conv.messages.push(reply);
        conv
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.get_all().await.unwrap().is_empty());
        assert_eq!(db.current_id().await.unwrap(), None);
    }

    #[test]
    fn test_migrations_record_latest_version_and_rerun_cleanly() {
        let db = Database::new_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        migrate(&conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn test_save_and_load_messages_in_order() {
        let db = Database::new_in_memory().unwrap();
        let conv = conversation_with_exchange();
        db.save(&conv).await.unwrap();

        let loaded = db.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Test Chat");
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].content, "Hello!");
        assert_eq!(loaded.messages[1].thinking.as_deref(), Some("greet back"));
        assert_eq!(loaded.messages[1].status, Some(MessageStatus::Complete));
    }

    #[tokio::test]
    async fn test_save_is_an_upsert() {
        let db = Database::new_in_memory().unwrap();
        let mut conv = conversation_with_exchange();
        db.save(&conv).await.unwrap();

        conv.title = "Renamed".to_string();
        conv.messages.push(Message::user("Another"));
        conv.touch();
        db.save(&conv).await.unwrap();

        let all = db.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Renamed");
        assert_eq!(all[0].messages.len(), 3);
        assert_eq!(all[0].messages[2].content, "Another");
    }

    #[tokio::test]
    async fn test_legacy_message_without_status() {
        let db = Database::new_in_memory().unwrap();
        let mut conv = Conversation::new();
        let mut legacy = Message::user("old");
        legacy.status = None;
        conv.messages.push(legacy);
        db.save(&conv).await.unwrap();

        let loaded = db.get(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages[0].status, None);
    }

    #[tokio::test]
    async fn test_create_sets_current() {
        let db = Database::new_in_memory().unwrap();
        let conv = db.create().await.unwrap();
        assert_eq!(db.current_id().await.unwrap(), Some(conv.id.clone()));
        assert!(db.get(&conv.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_cascades_and_clears_current() {
        let db = Database::new_in_memory().unwrap();
        let conv = conversation_with_exchange();
        db.save(&conv).await.unwrap();
        db.set_current_id(Some(&conv.id)).await.unwrap();

        db.delete(&conv.id).await.unwrap();
        assert!(db.get(&conv.id).await.unwrap().is_none());
        assert_eq!(db.current_id().await.unwrap(), None);

        let conn = db.conn.lock().unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_list_orders_by_recent_update() {
        let db = Database::new_in_memory().unwrap();
        let mut older = Conversation::new();
        older.updated_at = Utc::now() - chrono::Duration::hours(1);
        let newer = Conversation::new();
        db.save(&older).await.unwrap();
        db.save(&newer).await.unwrap();

        let all = db.get_all().await.unwrap();
        assert_eq!(all[0].id, newer.id);
        assert_eq!(all[1].id, older.id);
    }
}
