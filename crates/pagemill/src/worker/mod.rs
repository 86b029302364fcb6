pub mod job;
pub mod pool;

pub use job::{IngestFailure, IngestJob, IngestionResult, UploadRequest, UploadSource};
pub use pool::{JobHandle, WorkerPool};

// Re-export crossbeam_channel for embedders that select over job handles
pub use crossbeam_channel;
