use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::broadcast::job_progress::{JobPhase, JobProgressEvent};
use crate::error::{IngestError, WorkerError};
use crate::pipeline::progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
use crate::pipeline::{CancelToken, IngestPipeline, PipelineContext};
use crate::worker::job::{IngestJob, IngestionResult};

const RECV_TICK: Duration = Duration::from_millis(100);

struct QueuedJob {
    job: IngestJob,
    cancel: CancelToken,
    result_tx: Sender<IngestionResult>,
}

/// Caller's view of a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    job: IngestJob,
    cancel: CancelToken,
    result_rx: Receiver<IngestionResult>,
    result: Option<IngestionResult>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    /// Asks the job to stop. A job that already committed is unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The result, if the job has finished.
    pub fn try_result(&mut self) -> Option<IngestionResult> {
        if self.result.is_none() {
            self.result = match self.result_rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(self.abandoned()),
            };
        }
        self.result.clone()
    }

    /// Blocks until the job finishes.
    pub fn wait(mut self) -> IngestionResult {
        if let Some(result) = self.result.take() {
            return result;
        }
        match self.result_rx.recv() {
            Ok(result) => result,
            Err(_) => self.abandoned(),
        }
    }

    /// Blocks for at most `timeout`. The job keeps running if it has not finished.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<IngestionResult> {
        if self.result.is_none() {
            self.result = match self.result_rx.recv_timeout(timeout) {
                Ok(result) => Some(result),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(self.abandoned()),
            };
        }
        self.result.clone()
    }

    /// A job dropped without a result never ran to completion; the pool was
    /// shut down underneath it.
    fn abandoned(&self) -> IngestionResult {
        IngestionResult::failure(&self.job, &IngestError::Cancelled, Vec::new())
    }
}

pub struct WorkerPool {
    job_sender: Sender<QueuedJob>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(
        pipeline: Arc<IngestPipeline>,
        worker_count: usize,
        queue_capacity: usize,
    ) -> Result<Self, WorkerError> {
        Self::with_progress_sender(pipeline, worker_count, queue_capacity, None)
    }

    /// Creates a worker pool that reports progress to `job_progress_sender`.
    pub fn with_progress_sender(
        pipeline: Arc<IngestPipeline>,
        worker_count: usize,
        queue_capacity: usize,
        job_progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 || queue_capacity == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count and queue_capacity must be greater than zero".to_string(),
            ));
        }

        let (job_sender, job_receiver) = bounded::<QueuedJob>(queue_capacity);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_pipeline = Arc::clone(&pipeline);
            let progress_sender = job_progress_sender.clone();

            let handle = thread::Builder::new()
                .name(format!("pagemill-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        job_rx,
                        shutdown_flag,
                        worker_pipeline,
                        progress_sender,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            workers,
            shutdown,
            capacity: queue_capacity,
        })
    }

    /// Queues a job without blocking. A full queue is reported, not waited on.
    pub fn submit(&self, job: IngestJob) -> Result<JobHandle, WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        let cancel = CancelToken::new();
        let (result_tx, result_rx) = bounded(1);
        let queued = QueuedJob {
            job: job.clone(),
            cancel: cancel.clone(),
            result_tx,
        };

        match self.job_sender.try_send(queued) {
            Ok(()) => {
                debug!("Queued job {}", job.id);
                Ok(JobHandle {
                    job,
                    cancel,
                    result_rx,
                    result: None,
                })
            }
            Err(TrySendError::Full(_)) => {
                warn!("Job queue is full, refusing job {}", job.id);
                Err(WorkerError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(WorkerError::ChannelClosed),
        }
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Dropping the sender lets idle workers exit.
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<QueuedJob>,
    shutdown: Arc<AtomicBool>,
    pipeline: Arc<IngestPipeline>,
    progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(RECV_TICK) {
            Ok(queued) => {
                debug!("Worker {} processing job {}", worker_id, queued.job.id);
                // The job clock starts when a worker picks the job up.
                queued.cancel.start_deadline(pipeline.config().job_timeout);

                let result = match progress_sender {
                    Some(ref sender) => {
                        let progress = BroadcastProgress::new(
                            &queued.job.id,
                            &queued.job.request.declared_filename,
                            &queued.job.request.chapter_id,
                            queued.job.mime_type.as_deref(),
                            Arc::clone(sender),
                        );
                        progress.report(ProgressEvent::Phase {
                            phase: JobPhase::Queued,
                            message: "Job picked up by a worker".to_string(),
                        });
                        run_job(&pipeline, &queued, &progress)
                    }
                    None => run_job(&pipeline, &queued, &NoopProgress),
                };

                // The caller may have dropped its handle; that is not an error.
                if queued.result_tx.send(result).is_err() {
                    debug!(
                        "Worker {}: nobody is waiting for job {}",
                        worker_id, queued.job.id
                    );
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Runs one job, turning a panic anywhere below into a decoder-crash failure.
fn run_job(
    pipeline: &IngestPipeline,
    queued: &QueuedJob,
    progress: &dyn ProgressReporter,
) -> IngestionResult {
    let ctx = PipelineContext::new(queued.job.clone());
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        pipeline.run(ctx, &queued.cancel, progress).0
    }));

    match outcome {
        Ok(result) => result,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Job {} panicked: {}", queued.job.id, detail);
            let err = IngestError::CorruptArchive(format!("decoder crashed: {}", detail));
            progress.report(ProgressEvent::Failed {
                kind: err.kind(),
                message: err.user_message(),
            });
            IngestionResult::failure(&queued.job, &err, Vec::new())
        }
    }
}
