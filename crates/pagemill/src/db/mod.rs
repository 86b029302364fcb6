//! Chapter and page metadata.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access is serialized through a `Mutex<Connection>`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod chapter_repo;
pub mod error;
pub mod migrations;

pub use chapter_repo::{ChapterRow, ChapterStatus, NewPage, PageRow};
pub use error::DatabaseError;

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). WAL mode is enabled so readers listing
/// pages do not wait on an ingestion commit.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// Returns the canonical database path: `~/.pagemill/data/pagemill.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".pagemill").join("data").join("pagemill.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_db_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pagemill.db");
        Database::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path().unwrap();
        assert!(path.ends_with("pagemill.db"));
        assert!(path.to_string_lossy().contains(".pagemill"));
    }

    #[test]
    fn test_clones_share_connection() {
        let db = Database::open_in_memory().unwrap();
        let other = db.clone();
        chapter_repo::insert_chapter(&db, "ch-1", None).unwrap();
        assert!(chapter_repo::find_chapter(&other, "ch-1").unwrap().is_some());
    }
}
