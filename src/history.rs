//! Append-only store of recognized text.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Sink for successfully recognized text, called once per recognition.
#[cfg_attr(test, mockall::automock)]
pub trait HistoryStore: Send + Sync {
    /// Record one recognized text
    fn insert(&self, text: &str);
}

/// SQLite-backed [`HistoryStore`].
///
/// A failed open degrades to a no-op store; history is a convenience and
/// must never block dictation.
pub struct SqliteHistory {
    conn: Mutex<Option<Connection>>,
}

impl SqliteHistory {
    /// Open (or create) the history database at `path`.
    #[must_use]
    pub fn open(path: &Path) -> Self {
        let conn = match Self::try_open(path) {
            Ok(conn) => {
                info!(path = %path.display(), "history database opened");
                Some(conn)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "history database unavailable");
                None
            }
        };
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn try_open(path: &Path) -> rusqlite::Result<Connection> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS input_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                source_type TEXT NOT NULL DEFAULT 'voice',
                created_at REAL NOT NULL
            )",
            [],
        )?;
        Ok(conn)
    }

    /// Number of stored entries
    #[must_use]
    pub fn count(&self) -> usize {
        let Ok(guard) = self.conn.lock() else {
            return 0;
        };
        let Some(conn) = guard.as_ref() else {
            return 0;
        };
        conn.query_row("SELECT COUNT(*) FROM input_history", [], |row| row.get(0))
            .map(|n: i64| usize::try_from(n).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Most recent entries, newest first
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<String> {
        let Ok(guard) = self.conn.lock() else {
            return Vec::new();
        };
        let Some(conn) = guard.as_ref() else {
            return Vec::new();
        };

        let mut stmt = match conn
            .prepare("SELECT content FROM input_history ORDER BY created_at DESC, id DESC LIMIT ?1")
        {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!(error = %e, "history query failed");
                return Vec::new();
            }
        };

        stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))
            .map(|rows| rows.filter_map(Result::ok).collect())
            .unwrap_or_default()
    }
}

impl HistoryStore for SqliteHistory {
    fn insert(&self, text: &str) {
        let Ok(guard) = self.conn.lock() else {
            return;
        };
        let Some(conn) = guard.as_ref() else {
            return;
        };

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        if let Err(e) = conn.execute(
            "INSERT INTO input_history (content, source_type, created_at) VALUES (?1, 'voice', ?2)",
            params![text, created_at],
        ) {
            warn!(error = %e, "failed to insert history entry");
        }
    }
}
