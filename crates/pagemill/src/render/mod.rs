//! Rasterization of paginated documents into page images.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info_span};

use crate::error::IngestError;
use crate::extract::{CandidateEntry, ExtractContext};
use crate::pipeline::CancelToken;

pub mod poppler;

pub use self::poppler::PopplerRasterizer;

/// Extension of every rendered page.
pub const RENDERED_EXTENSION: &str = "png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentInfo {
    pub page_count: usize,
}

/// Reads the page count, refusing encrypted and unparseable documents.
pub fn inspect_document(path: &Path) -> Result<DocumentInfo, IngestError> {
    let bytes = fs::read(path).map_err(|e| IngestError::ReadSource {
        path: path.to_path_buf(),
        source: e,
    })?;

    let doc = lopdf::Document::load_mem(&bytes).map_err(|e| match e {
        lopdf::Error::Decryption(_) | lopdf::Error::InvalidPassword => {
            IngestError::PasswordProtected
        }
        other => IngestError::CorruptDocument(format!("Failed to load PDF: {}", other)),
    })?;
    // lopdf keeps the trailer's /Encrypt but only records a decryption state when the
    // empty user password opened the document.
    if doc.trailer.has(b"Encrypt") && !doc.was_encrypted() {
        return Err(IngestError::PasswordProtected);
    }

    Ok(DocumentInfo {
        page_count: doc.get_pages().len(),
    })
}

/// One page to rasterize.
#[derive(Debug, Clone, Copy)]
pub struct RasterRequest<'a> {
    pub document: &'a Path,
    /// 1-based page number.
    pub page: u32,
    pub dpi: u32,
    /// Where the PNG must be written.
    pub output: &'a Path,
    /// The rasterizer must not write more than this.
    pub max_output_bytes: u64,
}

pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, request: &RasterRequest<'_>, cancel: &CancelToken)
        -> Result<(), IngestError>;
}

pub struct DocumentRenderer {
    rasterizer: Arc<dyn PageRasterizer>,
    dpi: u32,
}

impl DocumentRenderer {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>, dpi: u32) -> Self {
        Self { rasterizer, dpi }
    }

    /// Renders every page into the workspace as `page-0001.png`, ...
    pub fn render(
        &self,
        source: &Path,
        ctx: &mut ExtractContext<'_>,
    ) -> Result<Vec<CandidateEntry>, IngestError> {
        ctx.cancel.check()?;
        let info = inspect_document(source)?;
        debug!(pages = info.page_count, dpi = self.dpi, "Inspected document");

        ctx.guard.disable_ratio_check();
        ctx.guard.admit_entries(info.page_count)?;

        let mut rendered = Vec::with_capacity(info.page_count);
        for page in 1..=info.page_count {
            let _span = info_span!("render.page", page).entered();
            ctx.cancel.check()?;

            let (sequence, relative_path) = ctx.reserve_slot(RENDERED_EXTENSION);
            let output = ctx.workspace.path_of(&relative_path);
            let request = RasterRequest {
                document: source,
                page: page as u32,
                dpi: self.dpi,
                output: &output,
                max_output_bytes: ctx.guard.remaining_bytes(),
            };
            self.rasterizer.rasterize(&request, ctx.cancel)?;

            let size = fs::metadata(&output)
                .map_err(|e| {
                    IngestError::CorruptDocument(format!("Page {} was not rendered: {}", page, e))
                })?
                .len();
            ctx.guard.consume(size)?;

            rendered.push(CandidateEntry {
                original_name: format!("page-{:04}.{}", page, RENDERED_EXTENSION),
                size,
                relative_path,
                sequence,
            });
        }
        Ok(rendered)
    }
}
