//! Ceilinged external decoder processes.
//!
//! Decoders we cannot run in-process (`7z`, `pdftoppm`) are spawned with no
//! stdin, memory/CPU/file-size rlimits, and a watchdog thread that kills the
//! child once the job is cancelled or its deadline passes.

use std::ffi::OsStr;
use std::io::{self, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DecoderConfig;
use crate::error::IngestError;
use crate::pipeline::CancelToken;

const WATCHDOG_TICK: Duration = Duration::from_millis(50);
const WAIT_TICK: Duration = Duration::from_millis(10);
const STDERR_CAPTURE: u64 = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderLimits {
    pub memory_bytes: u64,
    pub cpu_seconds: u64,
    /// Largest file the decoder may write. `None` leaves the limit untouched.
    pub file_size_bytes: Option<u64>,
}

impl DecoderLimits {
    pub fn from_config(config: &DecoderConfig) -> Self {
        Self {
            memory_bytes: config.memory_limit_bytes,
            cpu_seconds: config.cpu_limit_seconds,
            file_size_bytes: None,
        }
    }

    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size_bytes = Some(bytes);
        self
    }
}

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' exited abnormally ({status}): {stderr}")]
    Exited {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("'{program}' produced more than {limit} bytes of output")]
    OutputLimit { program: String, limit: usize },

    #[error("I/O with '{program}' failed: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("'{program}' was stopped: {reason}")]
    Interrupted { program: String, reason: IngestError },
}

impl DecoderError {
    /// Converts into the job error. Interruptions keep their own kind; every
    /// other failure becomes whatever `corrupt` builds from the diagnostic.
    pub fn into_ingest(self, corrupt: impl FnOnce(String) -> IngestError) -> IngestError {
        match self {
            DecoderError::Interrupted { reason, .. } => reason,
            other => {
                warn!(error = %other, "Decoder failed");
                corrupt(other.to_string())
            }
        }
    }

    /// Whether the decoder was killed for writing past its file-size limit.
    pub fn exceeded_file_size(&self) -> bool {
        match self {
            DecoderError::Exited { status, .. } => killed_by_file_size_limit(status),
            _ => false,
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            DecoderError::Exited { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

pub struct DecoderCommand {
    program: String,
    command: Command,
    limits: DecoderLimits,
}

impl DecoderCommand {
    pub fn new(program: &str, limits: DecoderLimits) -> Self {
        Self {
            program: program.to_string(),
            command: Command::new(program),
            limits,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.command.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command.args(args);
        self
    }

    pub fn spawn(mut self, cancel: &CancelToken) -> Result<DecoderProcess, DecoderError> {
        if let Some(reason) = cancel.interruption() {
            return Err(DecoderError::Interrupted {
                program: self.program,
                reason,
            });
        }

        self.command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        apply_limits(&mut self.command, self.limits);

        let mut child = self.command.spawn().map_err(|e| DecoderError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;
        debug!(program = %self.program, pid = child.id(), "Started decoder");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take().map(spawn_stderr_reader);
        let child = Arc::new(Mutex::new(child));
        let fired = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::start(Arc::clone(&child), cancel.clone(), Arc::clone(&fired));

        Ok(DecoderProcess {
            program: self.program,
            child,
            stdout,
            stderr,
            watchdog: Some(watchdog),
            fired,
            cancel: cancel.clone(),
            reaped: false,
        })
    }

    /// Runs to completion and returns at most `max_stdout` bytes of stdout.
    pub fn output(self, cancel: &CancelToken, max_stdout: usize) -> Result<Vec<u8>, DecoderError> {
        let program = self.program.clone();
        let mut process = self.spawn(cancel)?;

        let mut stdout = Vec::new();
        process
            .by_ref()
            .take(max_stdout as u64 + 1)
            .read_to_end(&mut stdout)
            .map_err(|e| DecoderError::Io {
                program: program.clone(),
                source: e,
            })?;
        if stdout.len() > max_stdout {
            return Err(DecoderError::OutputLimit {
                program,
                limit: max_stdout,
            });
        }

        process.finish()?;
        Ok(stdout)
    }
}

/// A running decoder. Reading yields its stdout.
///
/// Dropping without `finish` kills and reaps the child.
pub struct DecoderProcess {
    program: String,
    child: Arc<Mutex<Child>>,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    watchdog: Option<Watchdog>,
    fired: Arc<AtomicBool>,
    cancel: CancelToken,
    reaped: bool,
}

impl DecoderProcess {
    /// Waits for exit and checks how the decoder ended. Returns its stderr.
    pub fn finish(mut self) -> Result<String, DecoderError> {
        drop(self.stdout.take());
        let status = self.wait()?;
        self.reaped = true;
        self.stop_watchdog();
        let stderr = self.collect_stderr();

        if self.fired.load(Ordering::SeqCst) {
            return Err(DecoderError::Interrupted {
                program: self.program.clone(),
                reason: self
                    .cancel
                    .interruption()
                    .unwrap_or(IngestError::Cancelled),
            });
        }

        if !status.success() {
            return Err(DecoderError::Exited {
                program: self.program.clone(),
                status,
                stderr,
            });
        }

        debug!(program = %self.program, "Decoder finished");
        Ok(stderr)
    }

    fn wait(&self) -> Result<ExitStatus, DecoderError> {
        loop {
            let polled = {
                let mut child = self.child.lock().map_err(|_| DecoderError::Io {
                    program: self.program.clone(),
                    source: io::Error::new(io::ErrorKind::Other, "decoder handle lock poisoned"),
                })?;
                child.try_wait()
            };
            match polled {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => thread::sleep(WAIT_TICK),
                Err(e) => {
                    return Err(DecoderError::Io {
                        program: self.program.clone(),
                        source: e,
                    })
                }
            }
        }
    }

    fn stop_watchdog(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .unwrap_or_default()
    }
}

impl Read for DecoderProcess {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stdout.as_mut() {
            Some(stdout) => stdout.read(buf),
            None => Ok(0),
        }
    }
}

impl Drop for DecoderProcess {
    fn drop(&mut self) {
        drop(self.stdout.take());
        if !self.reaped {
            if let Ok(mut child) = self.child.lock() {
                let _ = child.kill();
                let _ = child.wait();
            }
            debug!(program = %self.program, "Killed unfinished decoder");
        }
        self.stop_watchdog();
        let _ = self.collect_stderr();
    }
}

struct Watchdog {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    fn start(child: Arc<Mutex<Child>>, cancel: CancelToken, fired: Arc<AtomicBool>) -> Self {
        let (stop, stopped) = bounded::<()>(0);
        let handle = thread::spawn(move || loop {
            match stopped.recv_timeout(WATCHDOG_TICK) {
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.interruption().is_some() {
                        fired.store(true, Ordering::SeqCst);
                        if let Ok(mut child) = child.lock() {
                            let _ = child.kill();
                        }
                        break;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Self { stop, handle }
    }

    fn stop(self) {
        drop(self.stop);
        let _ = self.handle.join();
    }
}

fn spawn_stderr_reader(mut stderr: ChildStderr) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut kept = Vec::new();
        let _ = stderr.by_ref().take(STDERR_CAPTURE).read_to_end(&mut kept);
        let _ = io::copy(&mut stderr, &mut io::sink());
        kept
    })
}

#[cfg(target_os = "linux")]
fn apply_limits(command: &mut Command, limits: DecoderLimits) {
    use nix::sys::resource::{setrlimit, Resource};
    use std::os::unix::process::CommandExt;

    // SAFETY: the hook runs between fork and exec and only issues setrlimit
    // syscalls, which are async-signal-safe.
    unsafe {
        command.pre_exec(move || {
            setrlimit(Resource::RLIMIT_AS, limits.memory_bytes, limits.memory_bytes)?;
            setrlimit(Resource::RLIMIT_CPU, limits.cpu_seconds, limits.cpu_seconds)?;
            if let Some(bytes) = limits.file_size_bytes {
                setrlimit(Resource::RLIMIT_FSIZE, bytes, bytes)?;
            }
            Ok(())
        });
    }
}

#[cfg(target_os = "linux")]
fn killed_by_file_size_limit(status: &ExitStatus) -> bool {
    use nix::sys::signal::Signal;
    use std::os::unix::process::ExitStatusExt;

    status.signal() == Some(Signal::SIGXFSZ as i32)
}

#[cfg(not(target_os = "linux"))]
fn killed_by_file_size_limit(_status: &ExitStatus) -> bool {
    false
}

#[cfg(not(target_os = "linux"))]
fn apply_limits(_command: &mut Command, _limits: DecoderLimits) {
    debug!("Decoder rlimits are only applied on Linux");
}
