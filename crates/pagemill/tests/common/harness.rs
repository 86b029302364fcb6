//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct owns everything one test needs:
//! - Temporary scratch and storage directories
//! - An in-memory metadata database with chapters created on demand
//! - A pipeline wired to a fake rasterizer, so documents render without poppler

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{GrayImage, Luma};
use tempfile::TempDir;

use pagemill::commit::CommitCoordinator;
use pagemill::db::{chapter_repo, ChapterStatus, Database, PageRow};
use pagemill::error::IngestError;
use pagemill::pipeline::{
    CancelToken, IngestPipeline, NoopProgress, PipelineConfig, PipelineContext, ProgressReporter,
};
use pagemill::render::{PageRasterizer, RasterRequest};
use pagemill::storage::{BlobStore, FileBlobStore, SqliteMetadataStore};
use pagemill::worker::{IngestJob, IngestionResult, UploadRequest};

/// Paper size the fake rasterizer renders, in inches.
const PAGE_WIDTH_IN: f64 = 8.5;
const PAGE_HEIGHT_IN: f64 = 11.0;

/// Renders every page as a blank US Letter page at the requested DPI.
pub struct FakeRasterizer;

impl FakeRasterizer {
    pub fn page_size(dpi: u32) -> (u32, u32) {
        (
            (PAGE_WIDTH_IN * dpi as f64).round() as u32,
            (PAGE_HEIGHT_IN * dpi as f64).round() as u32,
        )
    }
}

impl PageRasterizer for FakeRasterizer {
    fn rasterize(
        &self,
        request: &RasterRequest<'_>,
        cancel: &CancelToken,
    ) -> Result<(), IngestError> {
        cancel.check()?;
        let (width, height) = Self::page_size(request.dpi);
        GrayImage::from_pixel(width, height, Luma([255]))
            .save_with_format(request.output, image::ImageFormat::Png)
            .map_err(|e| IngestError::CorruptDocument(e.to_string()))
    }
}

/// Test harness providing an isolated pipeline environment.
pub struct TestHarness {
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub db: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let input_dir = base.join("input");
        let scratch_dir = base.join("scratch");
        let storage_dir = base.join("pages");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");

        let db = Database::open_in_memory().expect("Failed to open database");

        Self {
            temp_dir,
            input_dir,
            scratch_dir,
            storage_dir,
            db,
        }
    }

    /// A harness with `chapter_id` already registered.
    pub fn with_chapter(chapter_id: &str) -> Self {
        let harness = Self::new();
        harness.create_chapter(chapter_id);
        harness
    }

    pub fn create_chapter(&self, chapter_id: &str) {
        chapter_repo::insert_chapter(&self.db, chapter_id, None).expect("Failed to create chapter");
    }

    /// Default pipeline configuration rooted in this harness.
    pub fn config(&self) -> PipelineConfig {
        PipelineConfig::with_scratch_directory(&self.scratch_dir)
    }

    pub fn blob_store(&self) -> Arc<FileBlobStore> {
        Arc::new(FileBlobStore::new(&self.storage_dir))
    }

    pub fn pipeline(&self, config: PipelineConfig) -> IngestPipeline {
        self.pipeline_with_blobs(config, self.blob_store())
    }

    pub fn pipeline_with_blobs(
        &self,
        config: PipelineConfig,
        blobs: Arc<dyn BlobStore>,
    ) -> IngestPipeline {
        let commit =
            CommitCoordinator::new(blobs, Arc::new(SqliteMetadataStore::new(self.db.clone())));
        IngestPipeline::new(Arc::new(config), Arc::new(FakeRasterizer), commit)
    }

    /// Write a test input file to the input directory.
    pub fn write_input(&self, filename: &str, content: &[u8]) -> PathBuf {
        let path = self.input_dir.join(filename);
        std::fs::write(&path, content).expect("Failed to write input file");
        path
    }

    /// Runs an in-memory upload through a default pipeline.
    pub fn ingest(&self, bytes: Vec<u8>, filename: &str, chapter_id: &str) -> IngestionResult {
        self.ingest_with(&self.pipeline(self.config()), bytes, filename, chapter_id)
    }

    pub fn ingest_with(
        &self,
        pipeline: &IngestPipeline,
        bytes: Vec<u8>,
        filename: &str,
        chapter_id: &str,
    ) -> IngestionResult {
        let request = UploadRequest::from_bytes(bytes, filename, chapter_id, "test-caller");
        self.run(pipeline, request, &CancelToken::new(), &NoopProgress)
    }

    pub fn run(
        &self,
        pipeline: &IngestPipeline,
        request: UploadRequest,
        cancel: &CancelToken,
        progress: &dyn ProgressReporter,
    ) -> IngestionResult {
        let ctx = PipelineContext::new(IngestJob::new(request));
        pipeline.run(ctx, cancel, progress).0
    }

    pub fn status(&self, chapter_id: &str) -> ChapterStatus {
        chapter_repo::find_chapter(&self.db, chapter_id)
            .expect("Failed to query chapter")
            .expect("Chapter exists")
            .status
    }

    pub fn page_rows(&self, chapter_id: &str) -> Vec<PageRow> {
        chapter_repo::list_pages(&self.db, chapter_id).expect("Failed to list pages")
    }

    /// Every file under the page store, relative to its root, sorted.
    pub fn stored_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        collect_files(&self.storage_dir, &self.storage_dir, &mut files);
        files.sort();
        files
    }

    /// True when no job left anything behind in the scratch directory.
    pub fn scratch_is_clean(&self) -> bool {
        match std::fs::read_dir(&self.scratch_dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries {
        let path = entry.expect("Failed to read directory entry").path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else {
            let relative = path.strip_prefix(root).expect("Path is under root");
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
}
