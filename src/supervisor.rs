//! The long-lived owner of the OCR worker process.
//!
//! All traffic with the worker goes through one async mutex: requests, the
//! periodic restart and `close` are strictly serialized, so no two callers
//! ever share the pipes and a process is never replaced mid-exchange.

use crate::args::WorkerArgs;
use crate::error::{OcrError, Result};
use crate::gate::{READY_MARKER, STARTUP_OUTPUT_LIMIT};
use crate::process::ProcessHandle;
use crate::protocol::{self, ImageInput};
use crate::result::{parse_result, OcrResult};
use crate::scheduler;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Period between scheduled restarts; zero disables them
    pub restart_interval: Duration,
    /// Time a worker gets to exit after its input is closed before it is killed
    pub shutdown_grace: Duration,
    /// Substring of the worker's stdout that signals it is ready
    pub ready_marker: String,
    /// Bootstrap output allowed before the marker must have appeared
    pub startup_output_limit: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            // The worker leaks memory; restarting every 20 minutes keeps it bounded
            restart_interval: Duration::from_secs(20 * 60),
            shutdown_grace: Duration::from_millis(500),
            ready_marker: READY_MARKER.to_string(),
            startup_output_limit: STARTUP_OUTPUT_LIMIT,
        }
    }
}

/// Sticky failure: once set, requests fail without touching the worker.
#[derive(Debug, Clone)]
enum Fault {
    Closed,
    Startup(String),
}

impl Fault {
    fn to_error(&self) -> OcrError {
        match self {
            Fault::Closed => OcrError::Closed,
            Fault::Startup(message) => OcrError::StartupFailed(message.clone()),
        }
    }
}

struct Slot {
    handle: Option<ProcessHandle>,
    closed: bool,
}

/// State shared between the supervisor and its restart scheduler.
pub(crate) struct Shared {
    exe_path: PathBuf,
    args: Vec<String>,
    config: SupervisorConfig,
    slot: tokio::sync::Mutex<Slot>,
    // Written only while `slot` is locked. Readers may check it without the
    // lock as a fast path and must re-check under the lock.
    fault: RwLock<Option<Fault>>,
    generation: AtomicU64,
}

impl Shared {
    fn fault(&self) -> Option<OcrError> {
        let fault = match self.fault.read() {
            Ok(fault) => fault,
            Err(poisoned) => poisoned.into_inner(),
        };
        fault.as_ref().map(Fault::to_error)
    }

    fn set_fault(&self, _slot: &Slot, value: Option<Fault>) {
        let mut fault = match self.fault.write() {
            Ok(fault) => fault,
            Err(poisoned) => poisoned.into_inner(),
        };
        *fault = value;
    }

    async fn launch(&self, slot: &mut Slot) -> Result<()> {
        match ProcessHandle::launch(&self.exe_path, &self.args, &self.config).await {
            Ok(handle) => {
                slot.handle = Some(handle);
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.set_fault(slot, None);
                Ok(())
            }
            Err(e) => {
                let message = match &e {
                    OcrError::StartupFailed(message) => message.clone(),
                    other => other.to_string(),
                };
                self.set_fault(slot, Some(Fault::Startup(message)));
                Err(e)
            }
        }
    }

    /// Tear down the current worker and start a fresh one.
    pub(crate) async fn restart(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        if slot.closed {
            return Err(OcrError::Closed);
        }

        if let Some(mut handle) = slot.handle.take() {
            tracing::info!("Stopping OCR process {:?} for restart", handle.pid());
            handle.shutdown(self.config.shutdown_grace).await;
        }

        match self.launch(&mut slot).await {
            Ok(()) => {
                tracing::info!(
                    "OCR process restarted (generation {})",
                    self.generation.load(Ordering::SeqCst)
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!("OCR process restart failed: {}", e);
                Err(e)
            }
        }
    }

    async fn request(&self, input: &ImageInput) -> Result<Vec<u8>> {
        let line = protocol::encode_request(input)?;

        if let Some(fault) = self.fault() {
            return Err(fault);
        }

        let mut slot = self.slot.lock().await;
        if let Some(fault) = self.fault() {
            return Err(fault);
        }
        // An empty open slot means a restart was dropped between teardown
        // and launch
        let closed = slot.closed;
        let handle = slot.handle.as_mut().ok_or_else(|| {
            if closed {
                OcrError::Closed
            } else {
                OcrError::StartupFailed("OCR process restart interrupted".to_string())
            }
        })?;

        tracing::debug!("OCR request for {}", input.describe());
        let response = handle.exchange(&line).await?;
        tracing::debug!("OCR response of {} bytes", response.len());
        Ok(response)
    }
}

/// Make the executable path absolute and check that it names an existing file.
///
/// Symlinks are not resolved: the worker runs from the directory it was
/// configured in, not the link target's.
fn resolve_executable(exe_path: &Path) -> Result<PathBuf> {
    let not_found = || OcrError::NotFound(exe_path.to_path_buf());
    if exe_path.as_os_str().is_empty() {
        return Err(not_found());
    }
    let absolute = std::path::absolute(exe_path).map_err(|_| not_found())?;
    match std::fs::metadata(&absolute) {
        Ok(metadata) if metadata.is_file() => Ok(absolute),
        _ => Err(not_found()),
    }
}

/// Supervises one OCR worker process.
///
/// Must be closed with [`OcrSupervisor::close`]. Dropping an open supervisor
/// still stops the worker, but without waiting for it to exit.
pub struct OcrSupervisor {
    shared: Arc<Shared>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl OcrSupervisor {
    /// Start the worker at `exe_path` with default supervisor settings.
    pub async fn new(exe_path: impl AsRef<Path>, args: WorkerArgs) -> Result<Self> {
        Self::with_config(exe_path, args, SupervisorConfig::default()).await
    }

    /// Start the worker and wait until it reports ready.
    ///
    /// The restart scheduler only starts once the first launch succeeded.
    pub async fn with_config(
        exe_path: impl AsRef<Path>,
        args: WorkerArgs,
        config: SupervisorConfig,
    ) -> Result<Self> {
        let exe_path = resolve_executable(exe_path.as_ref())?;
        let shared = Arc::new(Shared {
            exe_path,
            args: args.to_args(),
            config,
            slot: tokio::sync::Mutex::new(Slot {
                handle: None,
                closed: false,
            }),
            fault: RwLock::new(None),
            generation: AtomicU64::new(0),
        });

        {
            let mut slot = shared.slot.lock().await;
            shared.launch(&mut slot).await?;
        }
        tracing::info!("OCR process started from {}", shared.exe_path.display());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = scheduler::spawn(
            Arc::downgrade(&shared),
            shared.config.restart_interval,
            shutdown_rx,
        );

        Ok(Self {
            shared,
            shutdown: Mutex::new(Some(shutdown_tx)),
            scheduler: Mutex::new(Some(task)),
        })
    }

    /// Send one request and return the worker's raw response line.
    ///
    /// Fails fast while the supervisor is closed or the last launch failed.
    /// I/O failures are returned as-is; the worker is not restarted.
    pub async fn ocr(&self, input: &ImageInput) -> Result<Vec<u8>> {
        self.shared.request(input).await
    }

    /// Recognize an image file. Relative paths resolve against the worker's directory.
    pub async fn ocr_file(&self, image_path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let path = image_path.as_ref().to_string_lossy().into_owned();
        self.ocr(&ImageInput::Path(path)).await
    }

    /// Recognize encoded image content (PNG, JPEG, ...).
    pub async fn ocr_bytes(&self, image: &[u8]) -> Result<Vec<u8>> {
        self.ocr(&ImageInput::Bytes(image.to_vec())).await
    }

    /// Recognize the clipboard image. Only some worker builds support it.
    pub async fn ocr_clipboard(&self) -> Result<Vec<u8>> {
        self.ocr(&ImageInput::clipboard()).await
    }

    pub async fn ocr_file_and_parse(&self, image_path: impl AsRef<Path>) -> Result<OcrResult> {
        parse_result(&self.ocr_file(image_path).await?)
    }

    pub async fn ocr_bytes_and_parse(&self, image: &[u8]) -> Result<OcrResult> {
        parse_result(&self.ocr_bytes(image).await?)
    }

    pub async fn ocr_clipboard_and_parse(&self) -> Result<OcrResult> {
        parse_result(&self.ocr_clipboard().await?)
    }

    /// Replace the worker now. Waits for any in-flight request to finish first.
    ///
    /// A successful restart clears a sticky startup failure.
    pub async fn restart(&self) -> Result<()> {
        self.shared.restart().await
    }

    /// Stop the restart scheduler and the worker.
    ///
    /// A second call returns [`OcrError::AlreadyClosed`].
    pub async fn close(&self) -> Result<()> {
        let mut slot = self.shared.slot.lock().await;
        if slot.closed {
            return Err(OcrError::AlreadyClosed);
        }
        slot.closed = true;

        if let Some(shutdown) = take(&self.shutdown) {
            // The scheduler may already be gone
            let _ = shutdown.send(());
        }
        self.shared.set_fault(&slot, Some(Fault::Closed));

        if let Some(mut handle) = slot.handle.take() {
            handle.shutdown(self.shared.config.shutdown_grace).await;
        }
        drop(slot);

        if let Some(task) = take(&self.scheduler) {
            if let Err(e) = task.await {
                tracing::warn!("Restart scheduler ended abnormally: {}", e);
            }
        }

        tracing::info!("OCR process closed");
        Ok(())
    }

    /// PID of the current worker. Waits behind any in-flight request.
    pub async fn worker_pid(&self) -> Option<u32> {
        let slot = self.shared.slot.lock().await;
        slot.handle
            .as_ref()
            .filter(|handle| !handle.has_exited())
            .and_then(|handle| handle.pid())
    }

    /// Number of successful worker launches so far.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Whether the background restart task is still running.
    pub fn scheduler_active(&self) -> bool {
        let scheduler = match self.scheduler.lock() {
            Ok(scheduler) => scheduler,
            Err(poisoned) => poisoned.into_inner(),
        };
        scheduler.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.shared.fault(), Some(OcrError::Closed))
    }
}

impl Drop for OcrSupervisor {
    fn drop(&mut self) {
        if let Some(shutdown) = take(&self.shutdown) {
            tracing::warn!("OCR supervisor dropped without close(), stopping worker");
            let _ = shutdown.send(());
        }
    }
}

fn take<T>(cell: &Mutex<Option<T>>) -> Option<T> {
    match cell.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

/// Start a worker, recognize one image file, and stop the worker again.
pub async fn ocr_file_once(
    exe_path: impl AsRef<Path>,
    image_path: impl AsRef<Path>,
    args: WorkerArgs,
) -> Result<Vec<u8>> {
    let supervisor = OcrSupervisor::new(exe_path, args).await?;
    let response = supervisor.ocr_file(image_path).await;
    if let Err(e) = supervisor.close().await {
        tracing::warn!("Failed to close OCR process: {}", e);
    }
    response
}

/// Like [`ocr_file_once`], returning the parsed result.
pub async fn ocr_file_once_and_parse(
    exe_path: impl AsRef<Path>,
    image_path: impl AsRef<Path>,
    args: WorkerArgs,
) -> Result<OcrResult> {
    parse_result(&ocr_file_once(exe_path, image_path, args).await?)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const ECHO_WORKER: &str = r#"echo "OCR init completed."
while IFS= read -r line; do printf '%s\n' "$line"; done"#;

    fn write_script(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn test_config() -> SupervisorConfig {
        SupervisorConfig {
            shutdown_grace: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();
        assert_eq!(config.restart_interval, Duration::from_secs(1200));
        assert_eq!(config.ready_marker, "OCR init completed.");
        assert_eq!(config.startup_output_limit, 4096);
    }

    #[test]
    fn test_resolve_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_executable(dir.path()),
            Err(OcrError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fault_fast_path_skips_worker() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(&dir, "echo-worker", ECHO_WORKER);
        let supervisor = OcrSupervisor::with_config(&exe, WorkerArgs::default(), test_config())
            .await
            .unwrap();

        {
            let slot = supervisor.shared.slot.lock().await;
            supervisor
                .shared
                .set_fault(&slot, Some(Fault::Startup("models missing".to_string())));
        }
        match supervisor.ocr_file("a.png").await {
            Err(OcrError::StartupFailed(message)) => assert_eq!(message, "models missing"),
            other => panic!("expected sticky failure, got {:?}", other),
        }

        // A successful restart clears the fault
        supervisor.restart().await.unwrap();
        assert_eq!(supervisor.generation(), 2);
        tokio_test::assert_ok!(supervisor.ocr_file("a.png").await);
        supervisor.close().await.unwrap();
    }

    #[test]
    fn test_resolve_keeps_symlink_location() {
        let target_dir = tempfile::tempdir().unwrap();
        let link_dir = tempfile::tempdir().unwrap();
        let exe = write_script(&target_dir, "echo-worker", ECHO_WORKER);
        let link = link_dir.path().join("PaddleOCR-json");
        std::os::unix::fs::symlink(&exe, &link).unwrap();

        assert_eq!(resolve_executable(&link).unwrap(), link);
    }

    #[tokio::test]
    async fn test_symlinked_worker_runs_in_link_directory() {
        let target_dir = tempfile::tempdir().unwrap();
        let link_dir = tempfile::tempdir().unwrap();
        let exe = write_script(
            &target_dir,
            "pwd-worker",
            r#"echo "OCR init completed."
while IFS= read -r line; do pwd; done"#,
        );
        let link = link_dir.path().join("PaddleOCR-json");
        std::os::unix::fs::symlink(&exe, &link).unwrap();

        let supervisor = OcrSupervisor::with_config(&link, WorkerArgs::default(), test_config())
            .await
            .unwrap();
        let response = supervisor.ocr_file("a.png").await.unwrap();
        let cwd = PathBuf::from(String::from_utf8_lossy(&response).trim().to_string());
        assert_eq!(
            cwd.canonicalize().unwrap(),
            link_dir.path().canonicalize().unwrap()
        );
        supervisor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_interrupted_restart_is_not_reported_as_closed() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(
            &dir,
            "slow-start-worker",
            r#"if [ -f "$(dirname "$0")/slow" ]; then sleep 2; fi
echo "OCR init completed."
while IFS= read -r line; do printf '%s\n' "$line"; done"#,
        );
        let supervisor = OcrSupervisor::with_config(&exe, WorkerArgs::default(), test_config())
            .await
            .unwrap();

        let marker = dir.path().join("slow");
        std::fs::write(&marker, "").unwrap();
        let interrupted =
            tokio::time::timeout(Duration::from_millis(400), supervisor.restart()).await;
        assert!(interrupted.is_err());

        assert!(!supervisor.is_closed());
        match supervisor.ocr_file("a.png").await {
            Err(OcrError::StartupFailed(message)) => {
                assert!(message.contains("interrupted"), "{}", message)
            }
            other => panic!("expected StartupFailed, got {:?}", other),
        }

        std::fs::remove_file(&marker).unwrap();
        supervisor.restart().await.unwrap();
        tokio_test::assert_ok!(supervisor.ocr_file("a.png").await);
        supervisor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_close_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(&dir, "echo-worker", ECHO_WORKER);
        let supervisor = OcrSupervisor::with_config(&exe, WorkerArgs::default(), test_config())
            .await
            .unwrap();

        supervisor.close().await.unwrap();
        assert!(supervisor.is_closed());
        assert!(matches!(supervisor.restart().await, Err(OcrError::Closed)));
        assert!(matches!(
            supervisor.ocr_bytes(b"png").await,
            Err(OcrError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_arguments_reach_worker() {
        let dir = tempfile::tempdir().unwrap();
        let exe = write_script(
            &dir,
            "args-worker",
            r#"echo "OCR init completed."
while IFS= read -r line; do echo "$*"; done"#,
        );
        let args = WorkerArgs {
            num_thread: "2".into(),
            do_angle: Some(false),
            ..Default::default()
        };
        let supervisor = OcrSupervisor::with_config(&exe, args, test_config())
            .await
            .unwrap();

        let response = supervisor.ocr_file("a.png").await.unwrap();
        assert_eq!(response, b"--doAngle=0 --numThread=2\n");
        supervisor.close().await.unwrap();
    }
}
