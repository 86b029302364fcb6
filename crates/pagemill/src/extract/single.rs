use std::fs::File;
use std::path::Path;

use super::{CandidateEntry, ContainerExtractor, ExtractContext};
use crate::config::RasterFormat;
use crate::error::IngestError;

/// A bare raster upload: the file itself is the only page.
#[derive(Debug, Clone)]
pub struct ImageExtractor {
    format: RasterFormat,
    page_name: String,
}

impl ImageExtractor {
    /// The page is named after the file the caller declared, not the staged copy.
    pub fn new(format: RasterFormat, declared_filename: &str) -> Self {
        let page_name = Path::new(declared_filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("page.{}", format.extension()));
        Self { format, page_name }
    }
}

impl ContainerExtractor for ImageExtractor {
    fn extract(
        &self,
        source: &Path,
        ctx: &mut ExtractContext<'_>,
    ) -> Result<Vec<CandidateEntry>, IngestError> {
        ctx.cancel.check()?;
        let mut file = File::open(source).map_err(|e| IngestError::ReadSource {
            path: source.to_path_buf(),
            source: e,
        })?;
        let entry = ctx.write_entry(&self.page_name, self.format.extension(), &mut file)?;
        Ok(vec![entry])
    }
}
