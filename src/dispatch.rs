//! # Run Dispatcher
//!
//! Coalesces concurrent triggers per concurrency group: at most one run is
//! active per group, and a new trigger for a busy group cancels the
//! in-progress run immediately instead of queuing behind it (latest wins;
//! triage state is idempotent, so re-evaluating is cheap and safe).
//! Cancellation is an abort at the next await point; actions already
//! applied stay applied.
//!
//! Group state lives in per-group run handles owned by the dispatcher.
//! There is no ambient lock object.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Lifecycle of one dispatched run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// The run is active.
    Running,
    /// The run finished normally.
    Completed,
    /// The run was aborted by a newer trigger for the same group.
    Cancelled,
}

struct ActiveRun {
    run_id: u64,
    handle: JoinHandle<()>,
    state_tx: Arc<watch::Sender<RunState>>,
}

/// Observer handle for one dispatched run.
#[derive(Debug, Clone)]
pub struct RunToken {
    run_id: u64,
    group: String,
    state_rx: watch::Receiver<RunState>,
}

impl RunToken {
    #[must_use]
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Current state of the run.
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    /// Wait until the run is no longer `Running` and return how it ended.
    pub async fn finished(&mut self) -> RunState {
        loop {
            let state = *self.state_rx.borrow();
            if state != RunState::Running {
                return state;
            }
            if self.state_rx.changed().await.is_err() {
                return *self.state_rx.borrow();
            }
        }
    }
}

/// Per-group run coalescing with latest-wins cancellation.
#[derive(Default)]
pub struct Dispatcher {
    active: Arc<Mutex<HashMap<String, ActiveRun>>>,
    next_run_id: AtomicU64,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `run` for `group`, cancelling any run still in progress for the
    /// same group.
    pub async fn dispatch<F>(&self, group: &str, run: F) -> RunToken
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let (state_tx, state_rx) = watch::channel(RunState::Running);
        let state_tx = Arc::new(state_tx);

        let mut active = self.active.lock().await;

        if let Some(previous) = active.remove(group) {
            previous.state_tx.send_replace(RunState::Cancelled);
            previous.handle.abort();
            info!(
                group = %group,
                cancelled_run = previous.run_id,
                new_run = run_id,
                "Cancelling in-progress run, latest trigger wins"
            );
        }

        let handle = {
            let runs = Arc::clone(&self.active);
            let group = group.to_string();
            let state_tx = Arc::clone(&state_tx);
            tokio::spawn(async move {
                run.await;

                // Return the group to idle (unless a newer run replaced us)
                // before anyone can observe the terminal state.
                {
                    let mut active = runs.lock().await;
                    if active.get(&group).is_some_and(|r| r.run_id == run_id) {
                        active.remove(&group);
                    }
                }
                state_tx.send_replace(RunState::Completed);
                debug!(group = %group, run = run_id, "Run completed");
            })
        };

        active.insert(
            group.to_string(),
            ActiveRun {
                run_id,
                handle,
                state_tx,
            },
        );

        RunToken {
            run_id,
            group: group.to_string(),
            state_rx,
        }
    }

    /// Whether a run is currently active for `group`.
    pub async fn is_running(&self, group: &str) -> bool {
        self.active.lock().await.contains_key(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn run_completes_and_group_returns_to_idle() {
        let dispatcher = Arc::new(Dispatcher::new());

        let mut token = dispatcher.dispatch("target-42", async {}).await;
        assert_eq!(token.finished().await, RunState::Completed);
        assert!(!dispatcher.is_running("target-42").await);
    }

    #[tokio::test]
    async fn new_trigger_cancels_in_progress_run_for_same_group() {
        let dispatcher = Arc::new(Dispatcher::new());

        let first = dispatcher
            .dispatch("target-42", futures::future::pending())
            .await;
        assert_eq!(first.state(), RunState::Running);
        assert!(dispatcher.is_running("target-42").await);

        let mut second = dispatcher.dispatch("target-42", async {}).await;

        assert_eq!(first.state(), RunState::Cancelled);
        assert_eq!(second.finished().await, RunState::Completed);
    }

    #[tokio::test]
    async fn distinct_groups_run_independently() {
        let dispatcher = Arc::new(Dispatcher::new());

        let first = dispatcher
            .dispatch("target-1", futures::future::pending())
            .await;
        let mut second = dispatcher.dispatch("target-2", async {}).await;

        assert_eq!(second.finished().await, RunState::Completed);
        // The unrelated group is untouched.
        assert_eq!(first.state(), RunState::Running);
        assert!(dispatcher.is_running("target-1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_does_not_wait_for_the_old_run() {
        let dispatcher = Arc::new(Dispatcher::new());

        let first = dispatcher
            .dispatch("target-9", async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            })
            .await;

        // Dispatching again returns immediately; nothing sleeps for an hour.
        let mut second = dispatcher.dispatch("target-9", async {}).await;
        assert_eq!(first.state(), RunState::Cancelled);
        assert_eq!(second.finished().await, RunState::Completed);
    }
}
