//! Chapter repository: chapter records and the pages attached to them.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;

use super::{Database, DatabaseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    Pending,
    Ready,
    Failed,
}

impl ChapterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterStatus::Pending => "pending",
            ChapterStatus::Ready => "ready",
            ChapterStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("Unknown chapter status '{0}'")]
pub struct UnknownStatus(String);

impl FromStr for ChapterStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChapterStatus::Pending),
            "ready" => Ok(ChapterStatus::Ready),
            "failed" => Ok(ChapterStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterRow {
    pub id: String,
    pub title: Option<String>,
    pub status: ChapterStatus,
    pub page_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl ChapterRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        let status = status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            status,
            page_count: row.get("page_count")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// A committed page row.
#[derive(Debug, Clone, Serialize)]
pub struct PageRow {
    pub chapter_id: String,
    pub ordinal: u32,
    pub storage_path: String,
    pub original_name: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    pub created_at: String,
}

impl PageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            chapter_id: row.get("chapter_id")?,
            ordinal: row.get("ordinal")?,
            storage_path: row.get("storage_path")?,
            original_name: row.get("original_name")?,
            mime_type: row.get("mime_type")?,
            width: row.get("width")?,
            height: row.get("height")?,
            size_bytes: row.get("size_bytes")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A page about to be attached to a chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPage {
    pub ordinal: u32,
    pub storage_path: String,
    pub original_name: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Creates a chapter in the `pending` state.
pub fn insert_chapter(
    db: &Database,
    id: &str,
    title: Option<&str>,
) -> Result<ChapterRow, DatabaseError> {
    db.with_conn(|conn| {
        let exists: Option<String> = conn
            .query_row("SELECT id FROM chapters WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        if exists.is_some() {
            return Err(DatabaseError::ChapterExists(id.to_string()));
        }

        let timestamp = now();
        conn.execute(
            "INSERT INTO chapters (id, title, status, page_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![id, title, ChapterStatus::Pending.as_str(), timestamp],
        )?;
        Ok(ChapterRow {
            id: id.to_string(),
            title: title.map(str::to_string),
            status: ChapterStatus::Pending,
            page_count: 0,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        })
    })
}

/// Finds a chapter by its ID.
pub fn find_chapter(db: &Database, id: &str) -> Result<Option<ChapterRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM chapters WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], ChapterRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists a chapter's pages in reading order.
pub fn list_pages(db: &Database, chapter_id: &str) -> Result<Vec<PageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM pages WHERE chapter_id = ?1 ORDER BY ordinal ASC")?;
        let rows = stmt
            .query_map(params![chapter_id], PageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Attaches `pages` to a chapter and marks it ready, in one transaction.
///
/// Fails without writing anything if the chapter is unknown or already
/// has pages.
pub fn commit_pages(
    db: &Database,
    chapter_id: &str,
    pages: &[NewPage],
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM chapters WHERE id = ?1",
                params![chapter_id],
                |r| r.get(0),
            )
            .optional()?;
        match status.as_deref() {
            None => return Err(DatabaseError::ChapterNotFound(chapter_id.to_string())),
            Some("ready") => {
                return Err(DatabaseError::ChapterAlreadyReady(chapter_id.to_string()))
            }
            Some(_) => {}
        }

        let timestamp = now();
        {
            let mut insert = tx.prepare(
                "INSERT INTO pages (chapter_id, ordinal, storage_path, original_name, mime_type,
                 width, height, size_bytes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for page in pages {
                insert.execute(params![
                    chapter_id,
                    page.ordinal,
                    page.storage_path,
                    page.original_name,
                    page.mime_type,
                    page.width,
                    page.height,
                    page.size_bytes,
                    timestamp,
                ])?;
            }
        }

        tx.execute(
            "UPDATE chapters SET status = ?2, page_count = ?3, updated_at = ?4 WHERE id = ?1",
            params![
                chapter_id,
                ChapterStatus::Ready.as_str(),
                pages.len() as u32,
                timestamp
            ],
        )?;

        tx.commit()?;
        log::info!("Committed {} pages to chapter {}", pages.len(), chapter_id);
        Ok(())
    })
}
