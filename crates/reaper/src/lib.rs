//! Deferred deletion of transient print artifacts (downloads, rendered pages).

pub mod reaper;
pub mod retry;

pub use reaper::{
    ArtifactRemover, DeleteFailure, FsRemover, ReleaseOutcome, ReleaseReport, ResourceReaper,
};
pub use retry::{RetryOutcome, RetryPolicy, DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS};
