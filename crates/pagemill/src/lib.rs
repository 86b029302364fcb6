pub mod broadcast;
pub mod commit;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod extract;
pub mod guard;
pub mod logging;
pub mod pipeline;
pub mod render;
pub mod sandbox;
pub mod sanitize;
pub mod sequence;
pub mod service;
pub mod storage;
pub mod validate;
pub mod worker;
pub mod workspace;

pub use broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
pub use commit::{CommitCoordinator, PageRecord};
pub use config::{load_config, Config, CorruptEntryPolicy, RasterFormat, TraversalPolicy};
pub use db::{ChapterStatus, Database};
pub use detect::SourceFormat;
pub use error::{
    ConfigError, ErrorKind, IngestError, PagemillError, Result, StorageError, WorkerError,
};
pub use pipeline::{CancelToken, IngestPipeline, PipelineConfig, PipelineWarning};
pub use service::IngestService;
pub use worker::{IngestionResult, JobHandle, UploadRequest, UploadSource, WorkerPool};
