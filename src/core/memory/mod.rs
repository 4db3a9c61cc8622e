use anyhow::{Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub const DEFAULT_TITLE: &str = "New Chat";
const PREVIEW_CHARS: usize = 100;
const TITLE_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::Assistant => "assistant",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "human" => Some(Role::Human),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Persistent conversation sessions.
pub struct SessionStore {
    db: Arc<Mutex<Connection>>,
}

impl SessionStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                preview TEXT NOT NULL DEFAULT '',
                created_at DATETIME DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                updated_at DATETIME DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            )",
            [],
        )?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at DATETIME DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            )",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id)",
            [],
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub async fn create_session(&self, title: Option<&str>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE);
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO sessions (id, title) VALUES (?1, ?2)",
            params![id, title],
        )?;
        info!("Created session {}", id);
        Ok(id)
    }

    pub async fn exists(&self, session_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let found: Option<i64> = db
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub async fn append(&self, session_id: &str, role: Role, text: &str) -> Result<()> {
        let preview: String = text.chars().take(PREVIEW_CHARS).collect();
        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE sessions SET preview = ?2,
                updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
             WHERE id = ?1",
            params![session_id, preview],
        )?;
        if updated == 0 {
            bail!("Session not found: {}", session_id);
        }
        db.execute(
            "INSERT INTO messages (session_id, role, content) VALUES (?1, ?2, ?3)",
            params![session_id, role.as_str(), text],
        )?;
        Ok(())
    }

    /// Messages in insertion order.
    pub async fn history(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT role, content, created_at FROM messages
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (role, content, created_at) = row?;
            if let Some(role) = Role::from_str(&role) {
                out.push(StoredMessage {
                    role,
                    content,
                    created_at,
                });
            }
        }
        Ok(out)
    }

    /// Most recently active first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, title, preview, created_at, updated_at FROM sessions
             ORDER BY updated_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SessionSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                preview: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        db.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session_id],
        )?;
        let n = db.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        if n > 0 {
            info!("Deleted session {}", session_id);
        }
        Ok(n > 0)
    }

    pub async fn rename_session(&self, session_id: &str, title: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let n = db.execute(
            "UPDATE sessions SET title = ?2 WHERE id = ?1",
            params![session_id, title],
        )?;
        Ok(n > 0)
    }

    /// Gives a still-untitled session a title taken from the user's first
    /// utterance.
    pub async fn auto_title(&self, session_id: &str, utterance: &str) -> Result<()> {
        let current: Option<String> = {
            let db = self.db.lock().await;
            db.query_row(
                "SELECT title FROM sessions WHERE id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .optional()?
        };
        if current.as_deref() == Some(DEFAULT_TITLE) {
            let title = title_from(utterance);
            if !title.is_empty() {
                self.rename_session(session_id, &title).await?;
            }
        }
        Ok(())
    }
}

pub(crate) fn title_from(utterance: &str) -> String {
    let trimmed = utterance.trim();
    let mut title: String = trimmed.chars().take(TITLE_CHARS).collect();
    if trimmed.chars().count() > TITLE_CHARS {
        title.push('…');
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_history_preserve_order() {
        let store = SessionStore::in_memory().unwrap();
        let id = store.create_session(None).await.unwrap();
        store.append(&id, Role::Human, "hi").await.unwrap();
        store.append(&id, Role::Assistant, "hello").await.unwrap();

        let history = store.history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::Human);
        assert_eq!(history[1].content, "hello");
    }

    #[tokio::test]
    async fn append_to_unknown_session_fails() {
        let store = SessionStore::in_memory().unwrap();
        assert!(store.append("missing", Role::Human, "x").await.is_err());
    }

    #[tokio::test]
    async fn preview_tracks_latest_message() {
        let store = SessionStore::in_memory().unwrap();
        let id = store.create_session(Some("Trip")).await.unwrap();
        let long = "x".repeat(150);
        store.append(&id, Role::Human, &long).await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions[0].title, "Trip");
        assert_eq!(sessions[0].preview.len(), 100);
    }

    #[tokio::test]
    async fn list_orders_by_recent_activity() {
        let store = SessionStore::in_memory().unwrap();
        let a = store.create_session(None).await.unwrap();
        let b = store.create_session(None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.append(&a, Role::Human, "bump").await.unwrap();

        let ids: Vec<_> = store
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[tokio::test]
    async fn delete_removes_session_and_messages() {
        let store = SessionStore::in_memory().unwrap();
        let id = store.create_session(None).await.unwrap();
        store.append(&id, Role::Human, "bye").await.unwrap();

        assert!(store.delete_session(&id).await.unwrap());
        assert!(store.history(&id).await.unwrap().is_empty());
        assert!(!store.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn auto_title_only_renames_default_titles() {
        let store = SessionStore::in_memory().unwrap();
        let fresh = store.create_session(None).await.unwrap();
        let named = store.create_session(Some("Keep me")).await.unwrap();
        let utterance = "Can you summarize what everyone said in the group chat today?";

        store.auto_title(&fresh, utterance).await.unwrap();
        store.auto_title(&named, utterance).await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        let title_of = |id: &str| {
            sessions
                .iter()
                .find(|s| s.id == id)
                .map(|s| s.title.clone())
                .unwrap()
        };
        assert_eq!(
            title_of(&fresh),
            "Can you summarize what everyone said in …"
        );
        assert_eq!(title_of(&named), "Keep me");
    }

    #[test]
    fn short_titles_are_not_ellipsized() {
        assert_eq!(title_from("  hi there "), "hi there");
    }
}
