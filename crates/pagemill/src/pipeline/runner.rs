use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use crate::broadcast::job_progress::JobPhase;
use crate::commit::CommitCoordinator;
use crate::detect;
use crate::error::IngestError;
use crate::extract::{ExtractContext, Extractor};
use crate::guard::ResourceGuard;
use crate::render::{DocumentRenderer, PageRasterizer, PopplerRasterizer};
use crate::sanitize;
use crate::sequence::sequence_pages;
use crate::storage::{BlobStore, MetadataStore};
use crate::validate::EntryValidator;
use crate::worker::job::{IngestionResult, UploadSource};
use crate::workspace::ScratchWorkspace;

use super::cancel::CancelToken;
use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::progress::{ProgressEvent, ProgressReporter};
use super::warning::PipelineWarning;

/// Workspace-relative name of an in-memory upload once spooled to disk.
const STAGED_UPLOAD: &str = "upload";

pub struct IngestPipeline {
    config: Arc<PipelineConfig>,
    rasterizer: Arc<dyn PageRasterizer>,
    validator: EntryValidator,
    commit: CommitCoordinator,
}

impl IngestPipeline {
    /// Production constructor: documents are rendered with poppler.
    pub fn from_config(
        config: Arc<PipelineConfig>,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let rasterizer = Arc::new(PopplerRasterizer::from_config(&config.decoders));
        Self::new(config, rasterizer, CommitCoordinator::new(blobs, metadata))
    }

    /// Inject a specific rasterizer and commit coordinator.
    pub fn new(
        config: Arc<PipelineConfig>,
        rasterizer: Arc<dyn PageRasterizer>,
        commit: CommitCoordinator,
    ) -> Self {
        let validator = EntryValidator::new(
            config.allowed_raster_formats.clone(),
            config.corrupt_entry_policy,
        );
        Self {
            config,
            rasterizer,
            validator,
            commit,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full pipeline for a single upload.
    ///
    /// Starts the job deadline if the caller has not already done so. The
    /// scratch workspace is gone by the time this returns.
    pub fn run(
        &self,
        mut ctx: PipelineContext,
        cancel: &CancelToken,
        progress: &dyn ProgressReporter,
    ) -> (IngestionResult, PipelineContext) {
        cancel.start_deadline(self.config.job_timeout);

        let filename = sanitize::redact_path(Path::new(&ctx.job.request.declared_filename));
        let source = match &ctx.job.request.source {
            UploadSource::Path(path) => sanitize::hash_path(path),
            UploadSource::Bytes(_) => "memory".to_string(),
        };
        let _pipeline_span = info_span!("pipeline",
            job_id = %ctx.job.id,
            filename = %filename,
            source = %source,
            chapter_id = %ctx.job.request.chapter_id,
            caller_id = %ctx.job.request.caller_id,
        )
        .entered();

        match self.execute(&mut ctx, cancel, progress) {
            Ok(()) => {
                info!(
                    pages = ctx.pages.len(),
                    warnings = ctx.warnings.len(),
                    "Ingestion succeeded"
                );
                progress.report(ProgressEvent::Completed {
                    page_count: ctx.pages.len(),
                });
                let result =
                    IngestionResult::success(&ctx.job, ctx.pages.clone(), ctx.warnings.clone());
                (result, ctx)
            }
            Err(e) => {
                let kind = e.kind();
                warn!(kind = %kind, error = %e, "Ingestion failed");
                progress.report(ProgressEvent::Failed {
                    kind,
                    message: e.user_message(),
                });
                let result = IngestionResult::failure(&ctx.job, &e, ctx.warnings.clone());
                (result, ctx)
            }
        }
    }

    fn execute(
        &self,
        ctx: &mut PipelineContext,
        cancel: &CancelToken,
        progress: &dyn ProgressReporter,
    ) -> Result<(), IngestError> {
        cancel.check()?;
        let mut guard = ResourceGuard::new(self.config.limits);

        // Step 1: Admit the upload before any work is spent on it
        {
            let _step = info_span!("admit").entered();
            let size = source_size(&ctx.job.request.source)?;
            guard.admit(size)?;
            debug!(bytes = size, "Upload admitted");
        }

        // Removed on every exit from here on.
        let workspace =
            ScratchWorkspace::create_in(&self.config.scratch_directory, &ctx.job.id)?;
        let source = stage_source(&ctx.job.request.source, &workspace)?;

        // Step 2: Detect the container family
        let detection = {
            let _step = info_span!("detect").entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Detecting,
                message: "Detecting file format...".to_string(),
            });
            let detection = detect::detect_file(&source, &ctx.job.request.declared_filename)?;
            if let Some(declared) = detection.extension_mismatch {
                ctx.warnings.push(PipelineWarning::FormatMismatch {
                    declared: declared.label().to_string(),
                    detected: detection.format.label().to_string(),
                });
            }
            debug!(
                format = detection.format.label(),
                by_signature = detection.by_signature,
                "Detected upload format"
            );
            ctx.detection = Some(detection.clone());
            detection
        };

        // Step 3: Extract entries or render pages
        let extractor = Extractor::for_format(
            detection.format,
            &self.config.decoders,
            &ctx.job.request.declared_filename,
        );
        let candidates = {
            let mut extract_ctx = ExtractContext::new(
                &workspace,
                &mut guard,
                cancel,
                self.config.traversal_policy,
                &mut ctx.warnings,
            );
            match extractor {
                Some(extractor) => {
                    let _step = info_span!("extract", family = extractor.family()).entered();
                    progress.report(ProgressEvent::Phase {
                        phase: JobPhase::Extracting,
                        message: format!("Extracting {} archive...", extractor.family()),
                    });
                    extractor.extract(&source, &mut extract_ctx)?
                }
                None => {
                    let _step = info_span!("render", dpi = self.config.render_dpi).entered();
                    progress.report(ProgressEvent::Phase {
                        phase: JobPhase::Rendering,
                        message: "Rendering document pages...".to_string(),
                    });
                    DocumentRenderer::new(Arc::clone(&self.rasterizer), self.config.render_dpi)
                        .render(&source, &mut extract_ctx)?
                }
            }
        };
        ctx.candidate_count = candidates.len();

        // Step 4: Validate every candidate
        let validated = {
            let _step = info_span!("validate", candidates = candidates.len()).entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Validating,
                message: format!("Validating {} entries...", candidates.len()),
            });
            self.validator
                .validate(&workspace, candidates, cancel, &mut ctx.warnings)?
        };
        ctx.valid_page_count = validated.len();

        // Step 5: Order pages
        let pages = {
            let _step = info_span!("sequence").entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Sequencing,
                message: "Ordering pages...".to_string(),
            });
            sequence_pages(validated)
        };

        // Step 6: Commit
        {
            let _step = info_span!("commit", pages = pages.len()).entered();
            // Last chance to abort with nothing persisted.
            cancel.check()?;
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Committing,
                message: format!("Saving {} pages...", pages.len()),
            });
            ctx.pages = self
                .commit
                .commit(&workspace, &ctx.job.request.chapter_id, &pages)?;
        }

        Ok(())
    }
}

fn source_size(source: &UploadSource) -> Result<u64, IngestError> {
    match source {
        UploadSource::Path(path) => {
            let metadata = fs::metadata(path).map_err(|e| IngestError::ReadSource {
                path: path.clone(),
                source: e,
            })?;
            if !metadata.is_file() {
                return Err(IngestError::UnsupportedFormat(format!(
                    "'{}' is not a regular file",
                    sanitize::redact_path(path)
                )));
            }
            Ok(metadata.len())
        }
        UploadSource::Bytes(bytes) => Ok(bytes.len() as u64),
    }
}

/// Path the pipeline reads the upload from. In-memory uploads are spooled
/// into the workspace so every decoder sees a file.
fn stage_source(
    source: &UploadSource,
    workspace: &ScratchWorkspace,
) -> Result<PathBuf, IngestError> {
    match source {
        UploadSource::Path(path) => Ok(path.clone()),
        UploadSource::Bytes(bytes) => {
            let relative = Path::new(STAGED_UPLOAD);
            let path = workspace.path_of(relative);
            let mut file = workspace.create_file(relative)?;
            file.write_all(bytes)
                .and_then(|_| file.flush())
                .map_err(|e| IngestError::Workspace {
                    path: path.clone(),
                    source: e,
                })?;
            Ok(path)
        }
    }
}
