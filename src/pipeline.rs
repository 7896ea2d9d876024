use crate::commit::{Commit, CommitAttempt};
use async_trait::async_trait;

/// A filter/interceptor invoked on reads (`select`) and writes
/// (`pre_commit`/`post_commit`) that may observe, filter, or reject commits.
///
/// Hooks are a short list, fixed at construction — no runtime mutation, no
/// class hierarchy, just an ordered collection of uniform capabilities. The
/// chain itself adds no retry, no transactionality, no parallelism; hooks
/// see reads and writes in the order they were given to
/// [`PipelineHooksAware::new`].
#[async_trait]
pub trait PipelineHook: Send + Sync {
    /// Applied during reads. Returning `None` filters the commit out.
    async fn select(&self, commit: Commit) -> Option<Commit> {
        Some(commit)
    }

    /// Applied in declared order before persistence. Returning `false`
    /// aborts the commit silently: no persistence, no post-hook
    /// invocation, no error.
    async fn pre_commit(&self, _attempt: &CommitAttempt) -> bool {
        true
    }

    /// Invoked in declared order after successful persistence.
    /// Side-effects only — any panic/error is the caller's problem, a
    /// post-commit failure never retracts the commit.
    async fn post_commit(&self, _commit: &Commit) {}

    /// Released when the owning facade is disposed.
    fn dispose(&self) {}
}

/// The ordered hook chain sitting between the stream engine and
/// persistence.
///
/// `select` is short-circuited: the first hook returning `None` wins and
/// remaining hooks are skipped for that commit.
pub struct PipelineHooksAware {
    hooks: Vec<Box<dyn PipelineHook>>,
}

impl PipelineHooksAware {
    pub fn new(hooks: Vec<Box<dyn PipelineHook>>) -> Self {
        Self { hooks }
    }

    pub fn empty() -> Self {
        Self { hooks: Vec::new() }
    }

    pub async fn select(&self, commit: Commit) -> Option<Commit> {
        let mut current = commit;
        for hook in &self.hooks {
            match hook.select(current).await {
                Some(next) => current = next,
                None => return None,
            }
        }
        Some(current)
    }

    /// Runs every hook's `pre_commit` in order. Returns `false` — and stops
    /// early — as soon as one hook rejects the attempt.
    pub async fn pre_commit(&self, attempt: &CommitAttempt) -> bool {
        for hook in &self.hooks {
            if !hook.pre_commit(attempt).await {
                return false;
            }
        }
        true
    }

    pub async fn post_commit(&self, commit: &Commit) {
        for hook in &self.hooks {
            hook.post_commit(commit).await;
        }
    }

    pub fn dispose(&self) {
        for hook in &self.hooks {
            hook.dispose();
        }
    }
}

impl Default for PipelineHooksAware {
    fn default() -> Self {
        Self::empty()
    }
}
