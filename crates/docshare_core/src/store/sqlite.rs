//! SQLite-backed document store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::watch;

use crate::document::{Document, DocumentStore, LiveQueries};
use crate::error::{DocShareError, Result};

/// SQL schema for the documents table
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    content TEXT NOT NULL
);
"#;

/// Document store backed by a single SQLite connection.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
    live: LiveQueries,
}

impl SqliteDocumentStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Create an in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        let initial = load_all(&conn)?;
        log::debug!("Opened document store with {} documents", initial.len());
        Ok(Self {
            conn: Mutex::new(conn),
            live: LiveQueries::new(initial),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, conn: &Connection) -> Result<()> {
        self.live.publish(load_all(conn)?);
        Ok(())
    }
}

fn load_all(conn: &Connection) -> Result<Vec<Document>> {
    let mut stmt = conn.prepare("SELECT id, title, content FROM documents ORDER BY id DESC")?;
    let docs = stmt
        .query_map([], |row| {
            Ok(Document {
                id: row.get(0)?,
                title: row.get(1)?,
                content: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(docs)
}

impl DocumentStore for SqliteDocumentStore {
    fn insert(&self, document: &Document) -> Result<i64> {
        let conn = self.conn();
        let id = if document.id == 0 {
            conn.execute(
                "INSERT INTO documents (title, content) VALUES (?, ?)",
                params![document.title, document.content],
            )?;
            conn.last_insert_rowid()
        } else {
            conn.execute(
                "INSERT OR REPLACE INTO documents (id, title, content) VALUES (?, ?, ?)",
                params![document.id, document.title, document.content],
            )?;
            document.id
        };
        self.publish(&conn)?;
        Ok(id)
    }

    fn update(&self, document: &Document) -> Result<()> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE documents SET title = ?, content = ? WHERE id = ?",
            params![document.title, document.content, document.id],
        )?;
        if changed == 0 {
            return Err(DocShareError::DocumentNotFound(document.id));
        }
        self.publish(&conn)
    }

    fn delete(&self, id: i64) -> Result<()> {
        let conn = self.conn();
        let existed = conn
            .query_row("SELECT 1 FROM documents WHERE id = ?", [id], |_| Ok(()))
            .optional()?
            .is_some();
        if existed {
            conn.execute("DELETE FROM documents WHERE id = ?", [id])?;
            self.publish(&conn)?;
        }
        Ok(())
    }

    fn get_all(&self) -> watch::Receiver<Vec<Document>> {
        self.live.subscribe_all()
    }

    fn get_by_id(&self, id: i64) -> watch::Receiver<Option<Document>> {
        self.live.subscribe_one(id)
    }
}
