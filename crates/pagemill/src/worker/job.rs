use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::commit::PageRecord;
use crate::error::{ErrorKind, IngestError};
use crate::pipeline::PipelineWarning;

/// Where the uploaded bytes live.
#[derive(Clone)]
pub enum UploadSource {
    /// A file the request layer already spooled to disk.
    Path(PathBuf),
    /// The upload held in memory.
    Bytes(Vec<u8>),
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            UploadSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub source: UploadSource,
    /// Filename as the user submitted it. Only a hint for detection.
    pub declared_filename: String,
    pub chapter_id: String,
    /// The request layer has already decided this caller may ingest.
    pub caller_id: String,
}

impl UploadRequest {
    pub fn from_path(
        path: impl Into<PathBuf>,
        declared_filename: &str,
        chapter_id: &str,
        caller_id: &str,
    ) -> Self {
        Self {
            source: UploadSource::Path(path.into()),
            declared_filename: declared_filename.to_string(),
            chapter_id: chapter_id.to_string(),
            caller_id: caller_id.to_string(),
        }
    }

    pub fn from_bytes(
        bytes: Vec<u8>,
        declared_filename: &str,
        chapter_id: &str,
        caller_id: &str,
    ) -> Self {
        Self {
            source: UploadSource::Bytes(bytes),
            declared_filename: declared_filename.to_string(),
            chapter_id: chapter_id.to_string(),
            caller_id: caller_id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestJob {
    pub id: String,
    pub request: UploadRequest,
    /// MIME type guessed from the declared filename, for progress events.
    pub mime_type: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl IngestJob {
    pub fn new(request: UploadRequest) -> Self {
        let mime_type = mime_guess::from_path(&request.declared_filename)
            .first()
            .map(|m| m.to_string());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            mime_type,
            submitted_at: Utc::now(),
        }
    }
}

/// The caller-facing half of an `IngestError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&IngestError> for IngestFailure {
    fn from(err: &IngestError) -> Self {
        let kind = err.kind();
        Self {
            kind,
            message: err.user_message(),
            retryable: kind.is_retryable(),
        }
    }
}

/// Terminal outcome of one job.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionResult {
    pub job_id: String,
    pub chapter_id: String,
    pub success: bool,
    pub page_count: usize,
    pub error: Option<IngestFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<PageRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<PipelineWarning>,
}

impl IngestionResult {
    pub fn success(
        job: &IngestJob,
        pages: Vec<PageRecord>,
        warnings: Vec<PipelineWarning>,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            chapter_id: job.request.chapter_id.clone(),
            success: true,
            page_count: pages.len(),
            error: None,
            pages,
            warnings,
        }
    }

    pub fn failure(job: &IngestJob, error: &IngestError, warnings: Vec<PipelineWarning>) -> Self {
        Self {
            job_id: job.id.clone(),
            chapter_id: job.request.chapter_id.clone(),
            success: false,
            page_count: 0,
            error: Some(IngestFailure::from(error)),
            pages: Vec::new(),
            warnings,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> IngestJob {
        IngestJob::new(UploadRequest::from_path(
            "/uploads/tmp-1",
            "Chapter 12.cbz",
            "ch-12",
            "user-7",
        ))
    }

    #[test]
    fn test_job_new_assigns_id_and_mime() {
        let a = job();
        let b = job();
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
        assert_eq!(a.request.chapter_id, "ch-12");

        let pdf = IngestJob::new(UploadRequest::from_bytes(vec![1, 2], "vol1.pdf", "c", "u"));
        assert_eq!(pdf.mime_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn test_bytes_source_debug_hides_content() {
        let source = UploadSource::Bytes(vec![0u8; 4096]);
        assert_eq!(format!("{:?}", source), "Bytes(4096 bytes)");
    }

    #[test]
    fn test_failure_result_carries_kind_and_user_message() {
        let err = IngestError::CorruptArchive("7z: Data Error in 'x.jpg'".to_string());
        let result = IngestionResult::failure(&job(), &err, Vec::new());

        assert!(!result.success);
        assert_eq!(result.page_count, 0);
        assert_eq!(result.error_kind(), Some(ErrorKind::CorruptArchive));
        let failure = result.error.as_ref().unwrap();
        assert!(!failure.message.contains("Data Error"));
        assert!(!failure.retryable);
    }

    #[test]
    fn test_result_serializes_error_as_object() {
        let err = IngestError::Timeout(std::time::Duration::from_secs(5));
        let result = IngestionResult::failure(&job(), &err, Vec::new());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "Timeout");
        assert_eq!(json["error"]["retryable"], true);
        assert!(json.get("pages").is_none());
    }
}
