use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::osascript;
use super::{ConnectorError, ConnectorResult, MessageSource, TextMessage};

/// Seconds between the Unix epoch and 2001-01-01, the Cocoa reference date.
pub(crate) const COCOA_EPOCH_OFFSET: i64 = 978_307_200;
pub const MAX_MESSAGES: usize = 50;

const PERMISSION_HINT: &str = "Grant Full Disk Access to the terminal running courier.";

/// Reads the local Messages database and sends through the Messages app.
/// The database is copied before every read so the live file is never
/// locked by us.
pub struct MessageConnector {
    db_path: PathBuf,
    scratch_dir: PathBuf,
    send_timeout: Duration,
}

impl MessageConnector {
    pub fn new(db_path: PathBuf, scratch_dir: PathBuf, send_timeout: Duration) -> Self {
        Self {
            db_path,
            scratch_dir,
            send_timeout,
        }
    }

    /// Copies chat.db to a file of its own, so concurrent reads never share
    /// a copy. The copy is removed when the returned guard drops.
    pub(crate) fn snapshot(db_path: &Path, scratch_dir: &Path) -> ConnectorResult<Snapshot> {
        let copy = scratch_dir.join(format!("chat-{}.db", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(scratch_dir)
            .and_then(|_| std::fs::copy(db_path, &copy))
            .map_err(|e| {
                let _ = std::fs::remove_file(&copy);
                ConnectorError::Permission(format!("Cannot access chat.db: {e}. {PERMISSION_HINT}"))
            })?;
        Ok(Snapshot { path: copy })
    }
}

pub(crate) struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub(crate) fn open(&self) -> ConnectorResult<Connection> {
        Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| ConnectorError::Failed(format!("Cannot open chat.db copy: {e}")))
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Could not remove {}: {}", self.path.display(), e);
        }
    }
}

/// Messages stores nanoseconds since the Cocoa reference date.
pub(crate) fn cocoa_to_unix(raw: i64) -> i64 {
    if raw == 0 {
        0
    } else {
        raw / 1_000_000_000 + COCOA_EPOCH_OFFSET
    }
}

pub(crate) fn query_messages(
    conn: &Connection,
    filter: Option<&str>,
    limit: usize,
) -> rusqlite::Result<Vec<TextMessage>> {
    let mut sql = String::from(
        "SELECT m.text, m.is_from_me, m.date,
                COALESCE(h.id, 'Unknown') AS sender_id,
                COALESCE(c.display_name, h.id, 'Unknown') AS chat_name
         FROM message m
         LEFT JOIN chat_message_join cmj ON cmj.message_id = m.ROWID
         LEFT JOIN chat c ON c.ROWID = cmj.chat_id
         LEFT JOIN handle h ON h.ROWID = m.handle_id
         WHERE m.text IS NOT NULL AND m.text != ''",
    );
    let limit = limit.clamp(1, MAX_MESSAGES) as i64;

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<TextMessage> {
        let is_self: bool = row.get::<_, i64>(1)? != 0;
        let sender: String = row.get(3)?;
        Ok(TextMessage {
            sender: if is_self { "Me".to_string() } else { sender },
            text: row.get(0)?,
            timestamp: cocoa_to_unix(row.get::<_, Option<i64>>(2)?.unwrap_or(0)),
            chat_label: row.get(4)?,
            is_self,
        })
    };

    let mut out = Vec::new();
    match filter.map(str::trim).filter(|f| !f.is_empty()) {
        Some(f) => {
            sql.push_str(
                " AND (h.id LIKE ?1 OR c.display_name LIKE ?1) ORDER BY m.date DESC LIMIT ?2",
            );
            let like = format!("%{f}%");
            let mut stmt = conn.prepare(&sql)?;
            for row in stmt.query_map(params![like, limit], map_row)? {
                out.push(row?);
            }
        }
        None => {
            sql.push_str(" ORDER BY m.date DESC LIMIT ?1");
            let mut stmt = conn.prepare(&sql)?;
            for row in stmt.query_map(params![limit], map_row)? {
                out.push(row?);
            }
        }
    }
    Ok(out)
}

#[async_trait]
impl MessageSource for MessageConnector {
    async fn read_messages(
        &self,
        filter: Option<&str>,
        limit: usize,
    ) -> ConnectorResult<Vec<TextMessage>> {
        let db_path = self.db_path.clone();
        let scratch = self.scratch_dir.clone();
        let filter = filter.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            let snapshot = Self::snapshot(&db_path, &scratch)?;
            let conn = snapshot.open()?;
            query_messages(&conn, filter.as_deref(), limit)
                .map_err(|e| ConnectorError::Failed(format!("Messages query failed: {e}")))
        })
        .await
        .map_err(|e| ConnectorError::Failed(e.to_string()))?
    }

    async fn send_message(&self, recipient: &str, text: &str) -> ConnectorResult<String> {
        if recipient.trim().is_empty() || text.trim().is_empty() {
            return Err(ConnectorError::InvalidArgument(
                "recipient and message are required".to_string(),
            ));
        }

        let script = format!(
            r#"tell application "Messages"
    set targetService to 1st service whose service type = iMessage
    set targetBuddy to buddy "{}" of targetService
    send "{}" to targetBuddy
end tell"#,
            osascript::escape(recipient.trim()),
            osascript::escape(text)
        );

        match osascript::run(&script, self.send_timeout).await {
            Ok(_) => {
                info!("iMessage sent to {}", recipient);
                Ok(format!("Message sent to {}", recipient.trim()))
            }
            Err(ConnectorError::Timeout(_)) => {
                Err(ConnectorError::Timeout("Send timed out".to_string()))
            }
            Err(ConnectorError::Failed(e)) => {
                warn!("iMessage send failed: {}", e);
                Err(ConnectorError::Failed(format!("Failed to send: {e}")))
            }
            Err(e) => Err(e),
        }
    }

    async fn available(&self) -> bool {
        let db_path = self.db_path.clone();
        let scratch = self.scratch_dir.clone();
        tokio::task::spawn_blocking(move || {
            let Ok(snapshot) = Self::snapshot(&db_path, &scratch) else {
                return false;
            };
            let Ok(conn) = snapshot.open() else {
                return false;
            };
            conn.query_row("SELECT 1 FROM message LIMIT 1", [], |_| Ok(()))
                .is_ok()
        })
        .await
        .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn);
        conn
    }

    fn seed(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE handle (ROWID INTEGER PRIMARY KEY, id TEXT);
             CREATE TABLE chat (ROWID INTEGER PRIMARY KEY, display_name TEXT);
             CREATE TABLE message (ROWID INTEGER PRIMARY KEY, text TEXT, is_from_me INTEGER,
                                   date INTEGER, handle_id INTEGER);
             CREATE TABLE chat_message_join (chat_id INTEGER, message_id INTEGER);
             INSERT INTO handle VALUES (1, '+15550001'), (2, 'sam@example.com');
             INSERT INTO chat VALUES (1, 'Family'), (2, NULL);
             INSERT INTO message VALUES (1, 'old news', 0, 1000000000, 1);
             INSERT INTO message VALUES (2, 'on my way', 1, 3000000000, 1);
             INSERT INTO message VALUES (3, 'lunch?', 0, 2000000000, 2);
             INSERT INTO message VALUES (4, '', 0, 4000000000, 2);
             INSERT INTO chat_message_join VALUES (1, 1), (1, 2), (2, 3), (2, 4);",
        )
        .unwrap();
    }

    #[test]
    fn cocoa_timestamps_convert_to_unix_seconds() {
        assert_eq!(cocoa_to_unix(0), 0);
        assert_eq!(cocoa_to_unix(1_000_000_000), COCOA_EPOCH_OFFSET + 1);
    }

    #[test]
    fn messages_come_back_newest_first_without_empty_text() {
        let rows = query_messages(&seeded(), None, 10).unwrap();
        let texts: Vec<_> = rows.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["on my way", "lunch?", "old news"]);
        assert_eq!(rows[0].sender, "Me");
        assert!(rows[0].is_self);
        assert_eq!(rows[0].chat_label, "Family");
        assert_eq!(rows[1].chat_label, "sam@example.com");
    }

    #[test]
    fn filter_matches_handle_or_chat_label() {
        let by_label = query_messages(&seeded(), Some("famil"), 10).unwrap();
        assert_eq!(by_label.len(), 2);
        let by_handle = query_messages(&seeded(), Some("sam@"), 10).unwrap();
        assert_eq!(by_handle.len(), 1);
        assert_eq!(by_handle[0].text, "lunch?");
    }

    #[test]
    fn limit_is_respected() {
        let rows = query_messages(&seeded(), None, 1).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn missing_database_is_a_permission_error() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MessageConnector::new(
            dir.path().join("nope.db"),
            dir.path().join("scratch"),
            Duration::from_secs(1),
        );
        let err = connector.read_messages(None, 5).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Permission(_)));
        assert!(err.to_string().contains("Full Disk Access"));
        assert!(!connector.available().await);
    }

    #[tokio::test]
    async fn concurrent_reads_use_private_copies_and_clean_up() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("chat.db");
        seed(&Connection::open(&db).unwrap());
        let scratch = dir.path().join("scratch");
        let connector = MessageConnector::new(db, scratch.clone(), Duration::from_secs(1));

        let (a, b) = tokio::join!(
            connector.read_messages(None, 10),
            connector.read_messages(Some("sam@"), 10)
        );

        assert_eq!(a.unwrap().len(), 3);
        assert_eq!(b.unwrap().len(), 1);
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn blank_send_is_rejected_before_automation() {
        let dir = tempfile::tempdir().unwrap();
        let connector =
            MessageConnector::new(dir.path().join("x"), dir.path().into(), Duration::from_secs(1));
        let err = connector.send_message(" ", "hi").await.unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidArgument(_)));
    }
}
