use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::error::IngestError;

/// Shared abort signal for one job: caller cancellation plus the job deadline.
///
/// Clones observe the same state. Every pipeline stage polls it between
/// units of work, and decoder watchdogs poll it while a subprocess runs.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    deadline: OnceLock<(Instant, Duration)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Starts the job clock. Only the first call has an effect.
    pub fn start_deadline(&self, timeout: Duration) {
        let _ = self.inner.deadline.set((Instant::now() + timeout, timeout));
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline.get().map(|(at, _)| *at)
    }

    /// The abort reason, if the job should stop now.
    pub fn interruption(&self) -> Option<IngestError> {
        if self.is_cancelled() {
            return Some(IngestError::Cancelled);
        }
        match self.inner.deadline.get() {
            Some((at, timeout)) if Instant::now() >= *at => Some(IngestError::Timeout(*timeout)),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<(), IngestError> {
        match self.interruption() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(observer.check().is_ok());

        token.cancel();
        assert!(observer.is_cancelled());
        assert_eq!(observer.check().unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_deadline_expires() {
        let token = CancelToken::new();
        token.start_deadline(Duration::from_millis(0));
        assert_eq!(token.check().unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_deadline_is_set_once() {
        let token = CancelToken::new();
        token.start_deadline(Duration::from_secs(3600));
        token.start_deadline(Duration::from_millis(0));
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_cancel_takes_precedence_over_timeout() {
        let token = CancelToken::new();
        token.start_deadline(Duration::from_millis(0));
        token.cancel();
        assert_eq!(token.check().unwrap_err().kind(), ErrorKind::Cancelled);
    }
}
