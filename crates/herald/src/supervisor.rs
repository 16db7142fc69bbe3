//! Supervised background tasks.
//!
//! Every task a component spawns is registered here under a name, sharing
//! one cancellation token. Shutdown cancels the token and then waits for
//! each task in turn, at most `grace` per task. A task still running after
//! its grace period is aborted and reported, so a stuck peer or a slow store
//! call can delay shutdown but never leak the task.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of a supervised shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that exited on their own within the grace period.
    pub stopped: usize,
    /// Tasks that had to be aborted, by name.
    pub aborted: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.aborted.is_empty()
    }
}

/// Owner of a group of named tasks sharing a cancellation token.
pub struct TaskSupervisor {
    owner: String,
    token: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl TaskSupervisor {
    pub fn new(owner: impl Into<String>) -> Self {
        Self::with_token(owner, CancellationToken::new())
    }

    /// Supervise tasks under an existing token.
    pub fn with_token(owner: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            owner: owner.into(),
            token,
            tasks: Vec::new(),
        }
    }

    /// Token observed by every supervised task.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Spawn a named task.
    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(owner = %self.owner, task = %name, "spawning supervised task");
        self.tasks.push((name, tokio::spawn(task)));
    }

    /// Number of tasks not yet reaped.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel all tasks and wait for them, aborting any that overrun `grace`.
    ///
    /// Tasks are awaited one after another, so the total wait is bounded by
    /// `len() * grace`.
    pub async fn shutdown(&mut self, grace: Duration) -> ShutdownReport {
        self.token.cancel();

        let mut report = ShutdownReport::default();
        for (name, handle) in self.tasks.drain(..) {
            if stop_task(&self.owner, &name, handle, grace).await {
                report.stopped += 1;
            } else {
                report.aborted.push(name);
            }
        }

        if !report.is_clean() {
            warn!(
                owner = %self.owner,
                aborted = ?report.aborted,
                "tasks did not stop within their grace period"
            );
        }
        report
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        // Nothing outlives its owner.
        self.token.cancel();
        for (_, handle) in &self.tasks {
            handle.abort();
        }
    }
}

/// Wait up to `grace` for an already-signalled task, aborting it on overrun.
///
/// Returns `true` if the task finished on its own.
pub async fn stop_task(owner: &str, name: &str, mut handle: JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            // Panicked or was aborted elsewhere; either way it is gone.
            warn!(owner = %owner, task = %name, error = %e, "supervised task ended abnormally");
            true
        }
        Err(_) => {
            warn!(
                owner = %owner,
                task = %name,
                grace_ms = grace.as_millis() as u64,
                "task ignored cancellation, aborting"
            );
            handle.abort();
            false
        }
    }
}
