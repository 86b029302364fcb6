//! Job progress broadcaster for real-time upload status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorKind;

/// Phase of job processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Detecting,
    Extracting,
    Rendering,
    Validating,
    Sequencing,
    Committing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Detecting => write!(f, "Detecting format"),
            JobPhase::Extracting => write!(f, "Extracting"),
            JobPhase::Rendering => write!(f, "Rendering pages"),
            JobPhase::Validating => write!(f, "Validating pages"),
            JobPhase::Sequencing => write!(f, "Ordering pages"),
            JobPhase::Committing => write!(f, "Saving pages"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    /// Declared filename of the upload.
    pub filename: String,
    pub chapter_id: String,
    pub phase: JobPhase,
    pub status: JobStatus,
    /// Human-readable message describing current activity.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Number of committed pages (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    /// Failure classification (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Caller-facing error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl JobProgressEvent {
    pub fn new(
        job_id: &str,
        filename: &str,
        chapter_id: &str,
        phase: JobPhase,
        message: &str,
    ) -> Self {
        let status = match phase {
            JobPhase::Completed => JobStatus::Completed,
            JobPhase::Failed => JobStatus::Failed,
            _ => JobStatus::Processing,
        };

        Self {
            job_id: job_id.to_string(),
            filename: filename.to_string(),
            chapter_id: chapter_id.to_string(),
            phase,
            status,
            message: message.to_string(),
            timestamp: Utc::now(),
            page_count: None,
            error_kind: None,
            error: None,
            mime_type: None,
        }
    }

    pub fn completed(job_id: &str, filename: &str, chapter_id: &str, page_count: usize) -> Self {
        let mut event = Self::new(
            job_id,
            filename,
            chapter_id,
            JobPhase::Completed,
            "Chapter pages are ready",
        );
        event.page_count = Some(page_count);
        event
    }

    pub fn failed(
        job_id: &str,
        filename: &str,
        chapter_id: &str,
        kind: ErrorKind,
        error: &str,
    ) -> Self {
        let mut event = Self::new(
            job_id,
            filename,
            chapter_id,
            JobPhase::Failed,
            "Processing failed",
        );
        event.error_kind = Some(kind);
        event.error = Some(error.to_string());
        event
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Gets the inner sender for creating trackers.
    pub fn sender(&self) -> Arc<broadcast::Sender<JobProgressEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single job.
pub struct JobProgressTracker {
    job_id: String,
    filename: String,
    chapter_id: String,
    mime_type: Option<String>,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(
        job_id: &str,
        filename: &str,
        chapter_id: &str,
        mime_type: Option<&str>,
        sender: Arc<broadcast::Sender<JobProgressEvent>>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            filename: filename.to_string(),
            chapter_id: chapter_id.to_string(),
            mime_type: mime_type.map(str::to_string),
            sender,
        }
    }

    fn send(&self, mut event: JobProgressEvent) {
        event.mime_type = self.mime_type.clone();
        let _ = self.sender.send(event);
    }

    pub fn update_phase(&self, phase: JobPhase, message: &str) {
        self.send(JobProgressEvent::new(
            &self.job_id,
            &self.filename,
            &self.chapter_id,
            phase,
            message,
        ));
    }

    pub fn completed(&self, page_count: usize) {
        self.send(JobProgressEvent::completed(
            &self.job_id,
            &self.filename,
            &self.chapter_id,
            page_count,
        ));
    }

    pub fn failed(&self, kind: ErrorKind, error: &str) {
        self.send(JobProgressEvent::failed(
            &self.job_id,
            &self.filename,
            &self.chapter_id,
            kind,
            error,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(JobProgressEvent::new(
            "job-1",
            "ch1.cbz",
            "ch-1",
            JobPhase::Extracting,
            "Extracting",
        ));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "job-1");
        assert_eq!(received.chapter_id, "ch-1");
        assert_eq!(received.phase, JobPhase::Extracting);
        assert_eq!(received.status, JobStatus::Processing);
    }

    #[test]
    fn test_send_without_subscribers_is_ignored() {
        let broadcaster = JobProgressBroadcaster::new(10);
        broadcaster.send(JobProgressEvent::new("j", "f", "c", JobPhase::Queued, "Queued"));
    }

    #[test]
    fn test_tracker_completion_and_failure() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let tracker = JobProgressTracker::new(
            "job-2",
            "ch2.pdf",
            "ch-2",
            Some("application/pdf"),
            broadcaster.sender(),
        );

        tracker.completed(12);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Completed);
        assert_eq!(received.page_count, Some(12));
        assert_eq!(received.mime_type.as_deref(), Some("application/pdf"));

        tracker.failed(ErrorKind::Timeout, "Processing took too long and was stopped.");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Failed);
        assert_eq!(received.error_kind, Some(ErrorKind::Timeout));
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = JobProgressEvent::completed("job-3", "a.zip", "ch-3", 4);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["jobId"], "job-3");
        assert_eq!(json["pageCount"], 4);
        assert_eq!(json["phase"], "completed");
        assert!(json.get("error").is_none());
    }
}
