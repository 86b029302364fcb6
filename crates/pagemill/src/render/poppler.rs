use tracing::warn;

use super::{PageRasterizer, RasterRequest};
use crate::config::DecoderConfig;
use crate::error::IngestError;
use crate::pipeline::CancelToken;
use crate::sandbox::{DecoderCommand, DecoderError, DecoderLimits};

const MAX_STDOUT_BYTES: usize = 64 * 1024;

/// Renders pages with poppler's `pdftoppm`, one process per page.
#[derive(Debug, Clone)]
pub struct PopplerRasterizer {
    binary: String,
    limits: DecoderLimits,
}

impl PopplerRasterizer {
    pub fn new(binary: impl Into<String>, limits: DecoderLimits) -> Self {
        Self {
            binary: binary.into(),
            limits,
        }
    }

    pub fn from_config(config: &DecoderConfig) -> Self {
        Self::new(config.pdftoppm_binary.clone(), DecoderLimits::from_config(config))
    }
}

impl PageRasterizer for PopplerRasterizer {
    fn rasterize(
        &self,
        request: &RasterRequest<'_>,
        cancel: &CancelToken,
    ) -> Result<(), IngestError> {
        // pdftoppm appends ".png" to the prefix when -singlefile is set.
        let prefix = request.output.with_extension("");
        let page = request.page.to_string();

        DecoderCommand::new(&self.binary, self.limits.with_file_size(request.max_output_bytes))
            .args(["-png", "-singlefile", "-r"])
            .arg(request.dpi.to_string())
            .args(["-f", page.as_str(), "-l", page.as_str()])
            .arg(request.document)
            .arg(&prefix)
            .output(cancel, MAX_STDOUT_BYTES)
            .map_err(|e| render_error(e, request.page))?;

        if !request.output.exists() {
            return Err(IngestError::CorruptDocument(format!(
                "pdftoppm produced no image for page {}",
                request.page
            )));
        }
        Ok(())
    }
}

fn render_error(err: DecoderError, page: u32) -> IngestError {
    if err.exceeded_file_size() {
        warn!(page, "Rendered page exceeded the remaining output budget");
        return IngestError::SizeExceeded(format!("page {} renders too large", page));
    }
    if err
        .stderr()
        .is_some_and(|stderr| stderr.to_ascii_lowercase().contains("password"))
    {
        return IngestError::PasswordProtected;
    }
    err.into_ingest(IngestError::CorruptDocument)
}
