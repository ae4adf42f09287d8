use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use log::{error, info, warn};
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Why a deletion attempt failed.
/// 刪除暫存檔失敗的原因。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeleteFailure {
    #[error("file is in use by another process")]
    Busy,
    #[error("file does not exist")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("{0}")]
    Other(String),
}

impl DeleteFailure {
    /// Classifies an I/O error raised by a delete call.
    pub fn from_io(err: &io::Error) -> Self {
        if is_busy(err) {
            return DeleteFailure::Busy;
        }
        match err.kind() {
            io::ErrorKind::NotFound => DeleteFailure::NotFound,
            io::ErrorKind::PermissionDenied => DeleteFailure::PermissionDenied,
            _ => DeleteFailure::Other(err.to_string()),
        }
    }

    /// Only a busy file can resolve itself by waiting.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeleteFailure::Busy)
    }
}

#[cfg(windows)]
fn is_busy(err: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(err.raw_os_error(), Some(32) | Some(33))
}

#[cfg(not(windows))]
fn is_busy(err: &io::Error) -> bool {
    // EBUSY, ETXTBSY
    matches!(err.raw_os_error(), Some(16) | Some(26))
}

/// Removes a single artifact. Swappable so tests can script failures.
pub trait ArtifactRemover: Send + Sync {
    fn remove(&self, path: &Path) -> Result<(), DeleteFailure>;
}

/// Deletes files from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRemover;

impl ArtifactRemover for FsRemover {
    fn remove(&self, path: &Path) -> Result<(), DeleteFailure> {
        fs::remove_file(path).map_err(|err| DeleteFailure::from_io(&err))
    }
}

/// Final state of a release request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Deleted,
    /// Still busy after the last attempt; the file stays on disk.
    Leaked,
    /// A failure that waiting cannot fix.
    Abandoned(DeleteFailure),
}

/// What happened while releasing one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    pub path: PathBuf,
    pub attempts: u32,
    /// Number of `warn!` records emitted for this artifact.
    pub warnings: u32,
    pub outcome: ReleaseOutcome,
}

enum ReaperMessage {
    Release(PathBuf),
    Flush(Sender<()>),
}

/// Owns transient artifacts handed over by sessions and deletes them with a
/// bounded retry. Cloning yields another handle to the same worker.
/// 接手工作階段交出的暫存檔，並以有限次數重試刪除。
#[derive(Clone)]
pub struct ResourceReaper {
    policy: RetryPolicy,
    remover: Arc<dyn ArtifactRemover>,
    queue: Sender<ReaperMessage>,
}

impl std::fmt::Debug for ResourceReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceReaper")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResourceReaper {
    /// Starts the background worker that serves [`ResourceReaper::schedule`].
    /// The worker exits once every handle has been dropped.
    pub fn spawn(policy: RetryPolicy, remover: Arc<dyn ArtifactRemover>) -> io::Result<Self> {
        let (queue, rx) = mpsc::channel();
        let worker_remover = Arc::clone(&remover);
        thread::Builder::new()
            .name("printbot-reaper".into())
            .spawn(move || run_worker(rx, policy, worker_remover))?;
        Ok(Self {
            policy,
            remover,
            queue,
        })
    }

    /// Filesystem-backed reaper with the default retry budget.
    pub fn with_defaults() -> io::Result<Self> {
        Self::spawn(RetryPolicy::default(), Arc::new(FsRemover))
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Deletes `path` on the calling thread. Blocks for at most
    /// [`RetryPolicy::max_total_delay`].
    pub fn release(&self, path: &Path) -> ReleaseReport {
        release_with(self.remover.as_ref(), self.policy, path)
    }

    /// Queues `path` for deletion on the worker thread.
    pub fn schedule(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        info!("Queued {} for deletion", path.display());
        if let Err(mpsc::SendError(message)) = self.queue.send(ReaperMessage::Release(path)) {
            if let ReaperMessage::Release(path) = message {
                warn!("Reaper worker is gone; deleting {} inline", path.display());
                self.release(&path);
            }
        }
    }

    /// Blocks until every artifact queued before this call has been processed.
    pub fn flush(&self) {
        let (ack, done) = mpsc::channel();
        if self.queue.send(ReaperMessage::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }
}

fn run_worker(rx: Receiver<ReaperMessage>, policy: RetryPolicy, remover: Arc<dyn ArtifactRemover>) {
    for message in rx {
        match message {
            ReaperMessage::Release(path) => {
                release_with(remover.as_ref(), policy, &path);
            }
            ReaperMessage::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

fn release_with(remover: &dyn ArtifactRemover, policy: RetryPolicy, path: &Path) -> ReleaseReport {
    let mut warnings = 0;
    let outcome = policy.run(
        |_| remover.remove(path),
        DeleteFailure::is_transient,
        |attempt, _| {
            warnings += 1;
            warn!(
                "Attempt {attempt}: {} is still in use, retrying",
                path.display()
            );
        },
    );

    let outcome_kind = match outcome.result {
        Ok(()) => {
            info!("Temporary file {} deleted", path.display());
            ReleaseOutcome::Deleted
        }
        Err(DeleteFailure::Busy) => {
            warnings += 1;
            warn!(
                "Giving up on {} after {} attempts; file left on disk",
                path.display(),
                outcome.attempts
            );
            ReleaseOutcome::Leaked
        }
        Err(DeleteFailure::NotFound) => {
            warnings += 1;
            warn!("Temporary file {} was already gone", path.display());
            ReleaseOutcome::Abandoned(DeleteFailure::NotFound)
        }
        Err(failure) => {
            error!("Error deleting file {}: {failure}", path.display());
            ReleaseOutcome::Abandoned(failure)
        }
    };

    ReleaseReport {
        path: path.to_path_buf(),
        attempts: outcome.attempts,
        warnings,
        outcome: outcome_kind,
    }
}
