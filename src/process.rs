//! A single running OCR worker process.
//!
//! The handle owns the child's pipes. The `Child` itself lives in a watcher
//! task that reaps it and publishes the exit outcome exactly once.

use crate::error::{OcrError, Result};
use crate::gate::{self, GateFailure};
use crate::protocol;
use crate::supervisor::SupervisorConfig;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Upper bound on retained stderr output; older bytes are dropped first.
const STDERR_CAPTURE_LIMIT: usize = 64 * 1024;

/// How long to wait for the stderr drain after the process is gone.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How a worker process ended.
#[derive(Debug, Clone)]
pub struct ExitOutcome {
    /// Exit status or the error returned while waiting for it
    pub status: String,
    /// Whether the supervisor asked the process to stop
    pub requested: bool,
}

/// Stderr drained in the background into a bounded buffer.
struct StderrCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl StderrCapture {
    fn spawn(stderr: ChildStderr) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(drain_stderr(stderr, buf.clone()));
        Self {
            buf,
            task: Some(task),
        }
    }

    /// Wait briefly for the drain to finish, then return what was captured.
    async fn collect(&mut self) -> String {
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await.is_err() {
                tracing::debug!("stderr drain still running, using partial capture");
            }
        }
        let buf = lock_buffer(&self.buf);
        String::from_utf8_lossy(&buf).trim().to_string()
    }
}

impl Drop for StderrCapture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn lock_buffer(buf: &Mutex<Vec<u8>>) -> std::sync::MutexGuard<'_, Vec<u8>> {
    match buf.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn drain_stderr(mut stderr: ChildStderr, buf: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 1024];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut captured = lock_buffer(&buf);
                captured.extend_from_slice(&chunk[..n]);
                if captured.len() > STDERR_CAPTURE_LIMIT {
                    let excess = captured.len() - STDERR_CAPTURE_LIMIT;
                    captured.drain(..excess);
                }
            }
        }
    }
}

/// Reap the child, killing it first when asked to (or when the handle is dropped).
async fn watch_exit(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    stopping: Arc<AtomicBool>,
    exit: watch::Sender<Option<ExitOutcome>>,
) {
    let outcome = tokio::select! {
        status = child.wait() => ExitOutcome {
            status: describe_status(status),
            requested: stopping.load(Ordering::SeqCst),
        },
        _ = kill => {
            if let Err(e) = child.start_kill() {
                tracing::warn!("Failed to kill OCR process: {}", e);
            }
            ExitOutcome {
                status: describe_status(child.wait().await),
                requested: true,
            }
        }
    };

    if outcome.requested {
        tracing::debug!("OCR process stopped ({})", outcome.status);
    } else {
        tracing::warn!("OCR process exited on its own ({})", outcome.status);
    }
    exit.send_replace(Some(outcome));
}

fn describe_status(status: std::io::Result<std::process::ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("wait failed: {}", e),
    }
}

/// Owns one worker process and its pipes.
pub(crate) struct ProcessHandle {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    stderr: StderrCapture,
    exit: watch::Receiver<Option<ExitOutcome>>,
    kill: Option<oneshot::Sender<()>>,
    stopping: Arc<AtomicBool>,
    // Set while a request is on the wire. Still set on entry means the last
    // exchange never completed, so the pipes no longer line up.
    pending: bool,
}

impl ProcessHandle {
    /// Spawn the worker and wait for its ready marker.
    ///
    /// On failure the process is torn down before returning.
    pub(crate) async fn launch(
        exe_path: &Path,
        args: &[String],
        config: &SupervisorConfig,
    ) -> Result<Self> {
        let mut handle = Self::spawn(exe_path, args)?;

        let ready = gate::wait_until_ready(
            handle.stdout.get_mut(),
            &config.ready_marker,
            config.startup_output_limit,
        )
        .await;

        match ready {
            Ok(()) => {
                tracing::info!("OCR process {:?} initialized", handle.pid);
                Ok(handle)
            }
            Err(failure) => Err(handle.abort_startup(failure, config.shutdown_grace).await),
        }
    }

    fn spawn(exe_path: &Path, args: &[String]) -> Result<Self> {
        let mut cmd = Command::new(exe_path);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Workers resolve model paths relative to their own directory
        if let Some(dir) = exe_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        tracing::debug!("Spawning {} {}", exe_path.display(), args.join(" "));
        let mut child = cmd
            .spawn()
            .map_err(|e| OcrError::StartupFailed(format!("OCR process start failed: {}", e)))?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (stdout, stderr) = match (stdout, stderr) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                return Err(OcrError::StartupFailed(
                    "OCR process pipes were not captured".to_string(),
                ))
            }
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        let stopping = Arc::new(AtomicBool::new(false));
        tokio::spawn(watch_exit(child, kill_rx, stopping.clone(), exit_tx));

        Ok(Self {
            pid,
            stdin,
            stdout: BufReader::new(stdout),
            stderr: StderrCapture::spawn(stderr),
            exit: exit_rx,
            kill: Some(kill_tx),
            stopping,
            pending: false,
        })
    }

    async fn abort_startup(mut self, failure: GateFailure, grace: Duration) -> OcrError {
        let outcome = self.shutdown(grace).await;
        let stderr = self.stderr.collect().await;

        let mut message = format!("OCR init failed: {}", failure);
        if let Some(outcome) = outcome {
            message.push_str(&format!(", process {}", outcome.status));
        }
        if !stderr.is_empty() {
            message.push_str(&format!(", stderr: {}", stderr));
        }
        OcrError::StartupFailed(message)
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub(crate) fn exit_outcome(&self) -> Option<ExitOutcome> {
        (*self.exit.borrow()).clone()
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// One request/response exchange. The caller holds the supervisor lock.
    ///
    /// If the returned future is dropped before completion (or the exchange
    /// fails), the handle refuses further requests with
    /// [`OcrError::OutOfSync`]: a half-written request or an unread response
    /// would otherwise pair the next caller with someone else's answer.
    pub(crate) async fn exchange(&mut self, line: &[u8]) -> Result<Vec<u8>> {
        if let Some(outcome) = self.exit_outcome().filter(|o| !o.requested) {
            return Err(OcrError::WorkerExited {
                status: outcome.status,
            });
        }
        if self.pending {
            return Err(OcrError::OutOfSync);
        }
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "OCR process input closed")
        })?;

        self.pending = true;
        protocol::write_request(stdin, line).await?;
        let response = protocol::read_response(&mut self.stdout).await?;
        self.pending = false;
        Ok(response)
    }

    /// Wait until the watcher has published the exit outcome.
    async fn wait_exit(&self) -> Option<ExitOutcome> {
        let mut exit = self.exit.clone();
        let outcome = match exit.wait_for(|o| o.is_some()).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        outcome
    }

    /// Stop the process: close stdin, kill it if it lingers past `grace`,
    /// and wait for the exit acknowledgment.
    pub(crate) async fn shutdown(&mut self, grace: Duration) -> Option<ExitOutcome> {
        if self.has_exited() {
            tracing::debug!("OCR process {:?} already exited", self.pid);
            return self.wait_exit().await;
        }

        self.stopping.store(true, Ordering::SeqCst);
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.shutdown().await {
                tracing::warn!("Failed to close OCR process input: {}", e);
            }
        }

        if tokio::time::timeout(grace, self.wait_exit()).await.is_err() {
            tracing::debug!(
                "OCR process {:?} still running after {:?}, killing",
                self.pid,
                grace
            );
            if let Some(kill) = self.kill.take() {
                // The watcher is gone only if the process already exited
                let _ = kill.send(());
            }
        }

        self.wait_exit().await
    }
}
