//! Request orchestration: admission control, the phase state machine,
//! cancellation, and unconditional cleanup.
//!
//! One engine instance runs at most one extraction at a time. Excess
//! requests are rejected with `UNARCHIVE_BUSY`, never queued; callers
//! retry themselves. Exactly-once settlement of each request is a
//! consequence of returning a single `Result` from one linear pipeline.

use crate::commit::commit;
use crate::enumerate::enumerate;
use crate::error::{Diagnostics, EngineError, ErrorKind};
use crate::reader::{ArchiveOpener, FormatOpener};
use crate::sandbox::SandboxPolicy;
use crate::staging::Stager;
use crate::types::{CancelResult, Phase, UnarchiveRequest, UnarchiveResult};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tunables for cancellation behavior.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long `cancel()` waits for the worker to observe cancellation
    /// before proactively removing the staging directory.
    pub cancel_grace: Duration,

    /// Busy-flag polling interval while waiting out the grace period.
    pub cancel_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cancel_grace: Duration::from_secs(3),
            cancel_poll_interval: Duration::from_millis(50),
        }
    }
}

/// The only cross-invocation shared mutable state: flags are atomics,
/// the staging path sits behind a mutex so `cancel()` can locate it from
/// another task. Only one request executes at a time, so nothing else is
/// shared.
struct EngineState {
    busy: AtomicBool,
    cancel_requested: Arc<AtomicBool>,
    current_staging: Mutex<Option<PathBuf>>,
    phase: Mutex<Phase>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            current_staging: Mutex::new(None),
            phase: Mutex::new(Phase::Idle),
        }
    }

    fn set_phase(&self, next: Phase) {
        let mut phase = self.phase.lock();
        debug!(from = phase.as_str(), to = next.as_str(), "phase transition");
        *phase = next;
    }
}

struct Inner {
    state: EngineState,
    policy: SandboxPolicy,
    config: EngineConfig,
    opener: Box<dyn ArchiveOpener>,
}

/// The extraction coordinator. Cheap to clone; clones share one
/// single-flight guard.
#[derive(Clone)]
pub struct Unarchiver {
    inner: Arc<Inner>,
}

impl Unarchiver {
    /// Engine with format auto-detection and default cancellation tuning.
    pub fn new(policy: SandboxPolicy) -> Self {
        Self::with_opener(policy, FormatOpener)
    }

    /// Engine with a caller-supplied archive opener. This is the
    /// decoder-capability seam; tests inject fakes here.
    pub fn with_opener(policy: SandboxPolicy, opener: impl ArchiveOpener + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: EngineState::new(),
                policy,
                config: EngineConfig::default(),
                opener: Box::new(opener),
            }),
        }
    }

    /// Replace the cancellation tuning. Only meaningful before the first
    /// request; the engine is otherwise immutable.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.config = config,
            None => warn!("with_config ignored: engine already shared"),
        }
        self
    }

    /// Run one extraction request to completion.
    ///
    /// Admission is an atomic busy-flag transition: a second call while
    /// one is in flight fails immediately with `UNARCHIVE_BUSY` and
    /// touches no files. All filesystem work runs on a blocking worker;
    /// the caller's task only awaits the outcome.
    ///
    /// # Errors
    ///
    /// See [`ErrorKind`] for the failure taxonomy. Whatever the failure,
    /// staging is discarded, the destination is untouched (or restored,
    /// for commit failures), and the busy flag is released.
    pub async fn unarchive(
        &self,
        request: UnarchiveRequest,
    ) -> Result<UnarchiveResult, EngineError> {
        let inner = self.inner.clone();

        // Admission check: synchronous, never blocks.
        if inner
            .state
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ErrorKind::Busy.into());
        }

        // A stale cancel from a finished request must not leak into this one.
        inner.state.cancel_requested.store(false, Ordering::Relaxed);

        // Releases busy, clears and removes any leftover staging dir on
        // every exit path, including worker panic.
        let guard = RunGuard {
            inner: inner.clone(),
        };

        let worker = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            run_pipeline(&inner, &request)
        });

        match worker.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                Err(ErrorKind::Extraction(format!("extraction worker failed: {join_err}")).into())
            }
        }
    }

    /// Request cooperative cancellation of the in-flight extraction.
    ///
    /// Returns `{cancelled: false}` immediately when the engine is idle.
    /// Otherwise waits up to the configured grace period for the worker
    /// to observe the flag; an unresponsive worker's staging directory is
    /// removed proactively to bound storage usage.
    pub async fn cancel(&self) -> CancelResult {
        let state = &self.inner.state;
        state.cancel_requested.store(true, Ordering::Relaxed);

        if !state.busy.load(Ordering::Acquire) {
            return CancelResult { cancelled: false };
        }

        let config = &self.inner.config;
        let deadline = tokio::time::Instant::now() + config.cancel_grace;
        while tokio::time::Instant::now() < deadline {
            if !state.busy.load(Ordering::Acquire) {
                return CancelResult { cancelled: true };
            }
            tokio::time::sleep(config.cancel_poll_interval).await;
        }

        // Grace elapsed with the worker still running: bound disk usage now.
        let staging = state.current_staging.lock().clone();
        if let Some(staging) = staging {
            let removed = tokio::task::spawn_blocking(move || {
                let result = std::fs::remove_dir_all(&staging);
                (staging, result)
            })
            .await;
            if let Ok((staging, Err(e))) = removed {
                warn!(staging = %staging.display(), error = %e, "proactive staging removal failed");
            }
        }

        CancelResult { cancelled: true }
    }
}

/// Unconditional per-request cleanup, "finally" discipline.
struct RunGuard {
    inner: Arc<Inner>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let state = &self.inner.state;

        if let Some(staging) = state.current_staging.lock().take() {
            if staging.exists() {
                if let Err(e) = std::fs::remove_dir_all(&staging) {
                    warn!(staging = %staging.display(), error = %e, "failed to remove staging dir");
                }
            }
        }

        state.set_phase(Phase::Idle);
        state.busy.store(false, Ordering::Release);
    }
}

/// The single linear pipeline one admitted request runs through.
fn run_pipeline(inner: &Inner, request: &UnarchiveRequest) -> Result<UnarchiveResult, EngineError> {
    let state = &inner.state;

    state.set_phase(Phase::Validating);

    // Sandbox check before any filesystem mutation.
    let destination = inner.policy.validate(&request.output_path)?;

    if !request.archive_path.is_file() {
        return Err(ErrorKind::NotFound(request.archive_path.clone()).into());
    }

    if state.cancel_requested.load(Ordering::Relaxed) {
        return Err(ErrorKind::Cancelled.into());
    }

    let mut reader = inner.opener.open(&request.archive_path)?;

    let parent = destination
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&parent).map_err(|e| ErrorKind::Directory {
        path: parent.clone(),
        source: e,
    })?;

    // Staging lives next to the destination, never inside it, so the
    // commit rename stays on one filesystem.
    let dest_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "out".to_string());
    let staging = tempfile::Builder::new()
        .prefix(&format!(".{dest_name}.staging-"))
        .tempdir_in(&parent)
        .map_err(ErrorKind::StagingDirCreate)?
        .keep();

    *state.current_staging.lock() = Some(staging.clone());

    state.set_phase(Phase::Staging);
    let mut stager = Stager::new(&staging, state.cancel_requested.clone())
        .map_err(|kind| fail(kind, 0, &staging))?;
    stager
        .run(reader.as_mut())
        .map_err(|kind| fail(kind, stager.staged(), &staging))?;

    state.set_phase(Phase::Committing);
    if state.cancel_requested.load(Ordering::Relaxed) {
        return Err(fail(ErrorKind::Cancelled, stager.staged(), &staging));
    }

    commit(&staging, &destination, stager.staged())
        .map_err(|kind| fail(kind, stager.staged(), &staging))?;

    // The staged tree is the destination now; the guard must not touch it.
    state.current_staging.lock().take();

    state.set_phase(Phase::Enumerating);
    let files = enumerate(&destination).map_err(|kind| fail(kind, stager.staged(), &staging))?;

    debug!(
        destination = %destination.display(),
        files = files.len(),
        "extraction complete"
    );

    Ok(UnarchiveResult {
        files,
        output_path: destination,
    })
}

/// Wrap a failure with debug-build diagnostics.
fn fail(kind: ErrorKind, staged: u64, staging: &std::path::Path) -> EngineError {
    let diagnostics = cfg!(debug_assertions).then(|| Diagnostics {
        entries_staged: staged,
        staging_path: staging.to_path_buf(),
    });
    EngineError::with_diagnostics(kind, diagnostics)
}
