use async_trait::async_trait;
use rusqlite::{Connection, params};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use super::{ConnectorError, ConnectorResult, DocumentHit, DocumentIndex, DocumentInfo};

pub const CHUNK_SIZE: usize = 500;
pub const CHUNK_OVERLAP: usize = 50;

/// Lexical document index kept in SQLite. Documents are split into
/// overlapping chunks; a chunk scores by the share of distinct query terms
/// it contains.
pub struct DocumentStore {
    db: Arc<Mutex<Connection>>,
}

impl From<rusqlite::Error> for ConnectorError {
    fn from(e: rusqlite::Error) -> Self {
        ConnectorError::Failed(format!("document index: {e}"))
    }
}

impl DocumentStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
             );
             CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                content TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);",
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn count(&self) -> ConnectorResult<usize> {
        let db = self.db.lock().await;
        let n: i64 = db.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

/// Fixed-size character windows with overlap. Whitespace-only windows are
/// dropped.
pub(crate) fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk.trim().to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub(crate) fn score(query_terms: &HashSet<String>, chunk: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let chunk_terms = terms(chunk);
    let hits = query_terms.iter().filter(|t| chunk_terms.contains(*t)).count();
    let raw = hits as f64 / query_terms.len() as f64;
    (raw * 10_000.0).round() / 10_000.0
}

#[async_trait]
impl DocumentIndex for DocumentStore {
    async fn search(&self, query: &str, k: usize) -> ConnectorResult<Vec<DocumentHit>> {
        let query_terms = terms(query);
        if query_terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT c.content, d.label FROM chunks c
             JOIN documents d ON d.id = c.document_id
             ORDER BY d.created_at, c.seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (content, label) = row?;
            let s = score(&query_terms, &content);
            if s > 0.0 {
                hits.push(DocumentHit {
                    content,
                    label,
                    score: s,
                });
            }
        }
        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn index_document(&self, label: &str, text: &str) -> ConnectorResult<DocumentInfo> {
        let label = label.trim();
        if label.is_empty() {
            return Err(ConnectorError::InvalidArgument(
                "label is required".to_string(),
            ));
        }
        let chunks = chunk_text(text, CHUNK_SIZE, CHUNK_OVERLAP);
        if chunks.is_empty() {
            return Err(ConnectorError::InvalidArgument(
                "document has no text content".to_string(),
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO documents (id, label) VALUES (?1, ?2)",
            params![id, label],
        )?;
        for (seq, chunk) in chunks.iter().enumerate() {
            tx.execute(
                "INSERT INTO chunks (document_id, seq, content) VALUES (?1, ?2, ?3)",
                params![id, seq as i64, chunk],
            )?;
        }
        let created_at: String = tx.query_row(
            "SELECT created_at FROM documents WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        tx.commit()?;

        info!("Indexed document '{}' ({} chunks)", label, chunks.len());
        Ok(DocumentInfo {
            id,
            label: label.to_string(),
            chunks: chunks.len(),
            created_at,
        })
    }

    async fn list_documents(&self) -> ConnectorResult<Vec<DocumentInfo>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT d.id, d.label, d.created_at, COUNT(c.id)
             FROM documents d LEFT JOIN chunks c ON c.document_id = d.id
             GROUP BY d.id ORDER BY d.created_at DESC, d.rowid DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DocumentInfo {
                id: row.get(0)?,
                label: row.get(1)?,
                created_at: row.get(2)?,
                chunks: row.get::<_, i64>(3)? as usize,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn delete_document(&self, id: &str) -> ConnectorResult<bool> {
        let db = self.db.lock().await;
        db.execute("DELETE FROM chunks WHERE document_id = ?1", params![id])?;
        let n = db.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        if n > 0 {
            info!("Deleted document {}", id);
        }
        Ok(n > 0)
    }
}
