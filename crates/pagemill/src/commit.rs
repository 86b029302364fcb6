//! All-or-nothing hand-off of sequenced pages to permanent storage.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::NewPage;
use crate::error::IngestError;
use crate::sequence::SequencedPage;
use crate::storage::{page_key, validate_chapter_id, BlobStore, MetadataStore};
use crate::workspace::ScratchWorkspace;

/// A page as it exists after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRecord {
    pub ordinal: u32,
    pub storage_key: String,
    pub original_name: String,
}

pub struct CommitCoordinator {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl CommitCoordinator {
    pub fn new(blobs: Arc<dyn BlobStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { blobs, metadata }
    }

    /// Moves every page into the blob store, then writes the metadata in one
    /// transaction. Any failure deletes the blobs already moved.
    pub fn commit(
        &self,
        workspace: &ScratchWorkspace,
        chapter_id: &str,
        pages: &[SequencedPage],
    ) -> Result<Vec<PageRecord>, IngestError> {
        validate_chapter_id(chapter_id)?;

        let mut moved: Vec<String> = Vec::with_capacity(pages.len());
        let mut rows = Vec::with_capacity(pages.len());

        for page in pages {
            let key = page_key(chapter_id, page.ordinal, page.format.extension());
            let source = workspace.path_of(&page.relative_path);
            if let Err(e) = self.blobs.put_file(&source, &key) {
                warn!(ordinal = page.ordinal, error = %e, "Blob move failed, rolling back");
                self.roll_back(&moved);
                return Err(e.into());
            }
            moved.push(key.clone());
            rows.push(NewPage {
                ordinal: page.ordinal,
                storage_path: key,
                original_name: page.original_name.clone(),
                mime_type: page.format.mime_type().to_string(),
                width: page.width,
                height: page.height,
                size_bytes: page.size,
            });
        }

        if let Err(e) = self.metadata.commit_pages(chapter_id, &rows) {
            warn!(error = %e, "Metadata commit failed, rolling back");
            self.roll_back(&moved);
            return Err(e.into());
        }

        info!(pages = rows.len(), "Committed chapter pages");
        Ok(rows
            .into_iter()
            .map(|row| PageRecord {
                ordinal: row.ordinal,
                storage_key: row.storage_path,
                original_name: row.original_name,
            })
            .collect())
    }

    fn roll_back(&self, moved: &[String]) {
        for key in moved.iter().rev() {
            if let Err(e) = self.blobs.delete(key) {
                error!(key = %key, error = %e, "Failed to remove blob during rollback");
            }
        }
    }
}
