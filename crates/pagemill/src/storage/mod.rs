//! Permanent homes for committed pages: blob bytes and metadata rows.

use std::path::Path;

use crate::db::{DatabaseError, NewPage};
use crate::error::StorageError;

pub mod blob;
pub mod metadata;

pub use blob::{page_key, validate_chapter_id, FileBlobStore};
pub use metadata::SqliteMetadataStore;

/// Where page bytes live once a job commits.
pub trait BlobStore: Send + Sync {
    /// Moves `source` to `key`. Must fail rather than overwrite.
    fn put_file(&self, source: &Path, key: &str) -> Result<(), StorageError>;

    /// Removes a stored blob. Missing blobs are not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Chapter and page records.
pub trait MetadataStore: Send + Sync {
    /// Inserts every page and marks the chapter ready, all or nothing.
    fn commit_pages(&self, chapter_id: &str, pages: &[NewPage]) -> Result<(), DatabaseError>;
}
