use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum PagemillError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Failure classification reported to callers in an `IngestionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    CorruptArchive,
    CorruptDocument,
    PasswordProtected,
    SizeExceeded,
    DecompressionRatioExceeded,
    PathTraversalRejected,
    NoValidPages,
    PartialDecodeFailure,
    StorageWriteFailure,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::CorruptArchive => "CorruptArchive",
            ErrorKind::CorruptDocument => "CorruptDocument",
            ErrorKind::PasswordProtected => "PasswordProtected",
            ErrorKind::SizeExceeded => "SizeExceeded",
            ErrorKind::DecompressionRatioExceeded => "DecompressionRatioExceeded",
            ErrorKind::PathTraversalRejected => "PathTraversalRejected",
            ErrorKind::NoValidPages => "NoValidPages",
            ErrorKind::PartialDecodeFailure => "PartialDecodeFailure",
            ErrorKind::StorageWriteFailure => "StorageWriteFailure",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
        }
    }

    /// Whether resubmitting the same upload unchanged might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can abort a single ingestion job.
///
/// `Display` carries full diagnostics for logs; `user_message` is what
/// callers get to see.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Corrupt document: {0}")]
    CorruptDocument(String),

    #[error("Input is password protected")]
    PasswordProtected,

    #[error("Size limit exceeded: {0}")]
    SizeExceeded(String),

    #[error("Decompression ratio {ratio:.1} exceeds limit of {limit:.1}")]
    DecompressionRatioExceeded { ratio: f64, limit: f64 },

    #[error("Entry '{entry}' resolves outside the scratch workspace")]
    PathTraversalRejected { entry: String },

    #[error("No valid pages found")]
    NoValidPages,

    #[error("Entry '{entry}' could not be decoded: {reason}")]
    PartialDecodeFailure { entry: String, reason: String },

    #[error("Failed to read upload '{path}': {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Scratch workspace I/O failed for '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage write failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Metadata write failed: {0}")]
    Metadata(#[from] DatabaseError),

    #[error("Job exceeded its time limit of {0:?}")]
    Timeout(Duration),

    #[error("Job was cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            IngestError::CorruptArchive(_) => ErrorKind::CorruptArchive,
            IngestError::CorruptDocument(_) => ErrorKind::CorruptDocument,
            IngestError::PasswordProtected => ErrorKind::PasswordProtected,
            IngestError::SizeExceeded(_) => ErrorKind::SizeExceeded,
            IngestError::DecompressionRatioExceeded { .. } => {
                ErrorKind::DecompressionRatioExceeded
            }
            IngestError::PathTraversalRejected { .. } => ErrorKind::PathTraversalRejected,
            IngestError::NoValidPages => ErrorKind::NoValidPages,
            IngestError::PartialDecodeFailure { .. } => ErrorKind::PartialDecodeFailure,
            // An unreadable upload is indistinguishable from a damaged one to the caller.
            IngestError::ReadSource { .. } => ErrorKind::CorruptArchive,
            IngestError::Workspace { .. }
            | IngestError::Storage(_)
            | IngestError::Metadata(_) => ErrorKind::StorageWriteFailure,
            IngestError::Timeout(_) => ErrorKind::Timeout,
            IngestError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Caller-facing message. Decoder output and filesystem paths stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            IngestError::UnsupportedFormat(_) => {
                "The file type is not supported. Upload a zip, rar, 7z, tar or PDF file, \
                 or a single image."
                    .to_string()
            }
            IngestError::CorruptArchive(_) | IngestError::ReadSource { .. } => {
                "The archive is damaged or could not be read.".to_string()
            }
            IngestError::CorruptDocument(_) => {
                "The document is damaged or could not be rendered.".to_string()
            }
            IngestError::PasswordProtected => {
                "Password-protected files are not supported.".to_string()
            }
            IngestError::SizeExceeded(detail) => format!("The upload is too large: {}.", detail),
            IngestError::DecompressionRatioExceeded { .. } => {
                "The archive expands to an unreasonable size and was rejected.".to_string()
            }
            IngestError::PathTraversalRejected { entry } => format!(
                "The archive contains an unsafe entry path ('{}') and was rejected.",
                entry
            ),
            IngestError::NoValidPages => "No usable page images were found.".to_string(),
            IngestError::PartialDecodeFailure { entry, .. } => {
                format!("The page '{}' is damaged or not a supported image.", entry)
            }
            IngestError::Workspace { .. }
            | IngestError::Storage(_)
            | IngestError::Metadata(_) => {
                "The pages could not be saved.".to_string()
            }
            IngestError::Timeout(_) => "Processing took too long and was stopped.".to_string(),
            IngestError::Cancelled => "The upload was cancelled.".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),

    #[error("Invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Job queue is full ({capacity} pending jobs)")]
    QueueFull { capacity: usize },
}

pub type Result<T> = std::result::Result<T, PagemillError>;
