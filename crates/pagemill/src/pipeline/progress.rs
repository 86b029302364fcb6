use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broadcast::job_progress::{JobPhase, JobProgressEvent, JobProgressTracker};
use crate::error::ErrorKind;

/// Events emitted by the pipeline during processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Phase { phase: JobPhase, message: String },
    Completed { page_count: usize },
    Failed { kind: ErrorKind, message: String },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for callers nobody listens to.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges pipeline events onto the job progress broadcast channel.
pub struct BroadcastProgress {
    tracker: JobProgressTracker,
}

impl BroadcastProgress {
    pub fn new(
        job_id: &str,
        filename: &str,
        chapter_id: &str,
        mime_type: Option<&str>,
        sender: Arc<broadcast::Sender<JobProgressEvent>>,
    ) -> Self {
        Self {
            tracker: JobProgressTracker::new(job_id, filename, chapter_id, mime_type, sender),
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase { phase, message } => self.tracker.update_phase(phase, &message),
            ProgressEvent::Completed { page_count } => self.tracker.completed(page_count),
            ProgressEvent::Failed { kind, message } => self.tracker.failed(kind, &message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::job_progress::{JobProgressBroadcaster, JobStatus};

    #[test]
    fn test_broadcast_progress_forwards_events() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let progress =
            BroadcastProgress::new("job-1", "ch.cbz", "ch-1", None, broadcaster.sender());

        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Validating,
            message: "Validating 3 entries".to_string(),
        });
        progress.report(ProgressEvent::Failed {
            kind: ErrorKind::NoValidPages,
            message: "No usable page images were found.".to_string(),
        });

        let first = rx.try_recv().unwrap();
        assert_eq!(first.phase, JobPhase::Validating);
        assert_eq!(first.message, "Validating 3 entries");

        let second = rx.try_recv().unwrap();
        assert_eq!(second.status, JobStatus::Failed);
        assert_eq!(second.error_kind, Some(ErrorKind::NoValidPages));
    }
}
