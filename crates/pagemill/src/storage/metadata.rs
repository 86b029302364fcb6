use super::MetadataStore;
use crate::db::{chapter_repo, Database, DatabaseError, NewPage};

/// `MetadataStore` over the SQLite chapter tables.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Database,
}

impl SqliteMetadataStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn commit_pages(&self, chapter_id: &str, pages: &[NewPage]) -> Result<(), DatabaseError> {
        chapter_repo::commit_pages(&self.db, chapter_id, pages)
    }
}
