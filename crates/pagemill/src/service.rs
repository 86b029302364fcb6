//! The ingestion entry point: one object wiring storage, pipeline and workers.

use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use tokio::sync::broadcast;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::Config;
use crate::db::{default_database_path, Database};
use crate::error::{ConfigError, Result, WorkerError};
use crate::pipeline::{IngestPipeline, PipelineConfig};
use crate::storage::{FileBlobStore, SqliteMetadataStore};
use crate::worker::job::{IngestJob, IngestionResult, UploadRequest, UploadSource};
use crate::worker::pool::{JobHandle, WorkerPool};

/// The configured database location, or the per-user default.
pub fn database_path(config: &Config) -> Result<PathBuf> {
    match config.database_path {
        Some(ref path) => Ok(PathBuf::from(path)),
        None => default_database_path().ok_or_else(|| {
            ConfigError::Validation {
                message: "database_path is not set and no home directory was found".to_string(),
            }
            .into()
        }),
    }
}

pub struct IngestService {
    database: Database,
    broadcaster: JobProgressBroadcaster,
    pool: WorkerPool,
}

impl IngestService {
    /// Opens the metadata database, prepares the page store and starts the
    /// worker pool described by `config`.
    pub fn start(config: &Config) -> Result<Self> {
        let database = Database::open(&database_path(config)?)?;

        let pipeline = IngestPipeline::from_config(
            Arc::new(PipelineConfig::from_config(config)),
            Arc::new(FileBlobStore::new(&config.storage_directory)),
            Arc::new(SqliteMetadataStore::new(database.clone())),
        );

        info!(
            "Ingestion service starting: storage={}, scratch={}",
            config.storage_directory, config.scratch_directory
        );

        Self::with_pipeline(
            database,
            pipeline,
            config.worker_count,
            config.queue_capacity,
        )
    }

    /// Wires an already-built pipeline. The pipeline's metadata store is
    /// expected to point at `database`.
    pub fn with_pipeline(
        database: Database,
        pipeline: IngestPipeline,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Result<Self> {
        let broadcaster = JobProgressBroadcaster::default();
        let pool = WorkerPool::with_progress_sender(
            Arc::new(pipeline),
            worker_count,
            queue_capacity,
            Some(broadcaster.sender()),
        )?;

        Ok(Self {
            database,
            broadcaster,
            pool,
        })
    }

    /// Queues an upload and returns immediately.
    pub fn submit(&self, request: UploadRequest) -> std::result::Result<JobHandle, WorkerError> {
        self.pool.submit(IngestJob::new(request))
    }

    /// Ingests one upload and blocks until it is committed or has failed.
    ///
    /// A full queue is returned as an error rather than waited out.
    pub fn ingest(
        &self,
        source: UploadSource,
        declared_filename: &str,
        chapter_id: &str,
        caller_id: &str,
    ) -> std::result::Result<IngestionResult, WorkerError> {
        let request = UploadRequest {
            source,
            declared_filename: declared_filename.to_string(),
            chapter_id: chapter_id.to_string(),
            caller_id: caller_id.to_string(),
        };
        Ok(self.submit(request)?.wait())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Stops accepting work and waits for running jobs to finish.
    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
    }
}
