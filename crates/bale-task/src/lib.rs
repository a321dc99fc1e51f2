//! Cooperative task primitive for the bale bundle delivery engine
//!
//! Every long-running operation in the engine (bundle downloads, cache
//! writes, provider resolution) is a steppable unit of work advanced by a
//! driver calling [`CooperativeTask::update`] on a regular cadence. Nothing
//! in this crate spawns threads; forward progress on the control plane only
//! happens on the polling thread. Implementations are free to delegate
//! their data plane to spawned tokio tasks, as long as `update` observes
//! the outcome instead of blocking on it.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Result type for task driving operations
pub type Result<T> = std::result::Result<T, DriveError>;

/// Errors produced while driving a task to completion
#[derive(Debug, Error)]
pub enum DriveError {
    /// The task did not reach a terminal state within the poll budget
    #[error("task did not complete within {max_polls} polls")]
    PollBudgetExhausted {
        /// Number of polls that were attempted
        max_polls: u32,
    },
}

/// Lifecycle state of a cooperative task.
///
/// Transitions are one-way: `Idle` → `Running` → one of the three terminal
/// states. A task never leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskStatus {
    /// Created but not yet started
    #[default]
    Idle,
    /// Started and making progress when polled
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
    /// Cancelled before completion
    Aborted,
}

impl TaskStatus {
    /// Whether the task has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    /// Whether the task has been started (terminal states included).
    pub fn is_started(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// The common contract every steppable operation in the engine implements.
///
/// `update` must be safe to call on every tick, including before `start`
/// and after a terminal state is reached — both are no-ops. `abort` is
/// cooperative: it requests cancellation and the terminal `Aborted` state
/// becomes observable on the next poll at the latest.
pub trait CooperativeTask {
    /// Transition the task out of `Idle`. Calling `start` on a task that
    /// already started is a no-op.
    fn start(&mut self);

    /// Advance the task by one step.
    fn update(&mut self);

    /// Request cancellation. Parent tasks propagate the abort to their
    /// children before flipping their own state.
    fn abort(&mut self);

    /// Current lifecycle state.
    fn status(&self) -> TaskStatus;

    /// Terminal error message, if the task failed or was aborted.
    fn error(&self) -> Option<String>;

    /// Poll once, then report whether the task reached a terminal state.
    fn is_done(&mut self) -> bool {
        self.update();
        self.status().is_terminal()
    }
}

/// Drive a task to completion with a bounded poll loop.
///
/// This is the synchronous-context escape hatch for callers that must not
/// return control (teardown paths). It is still cooperative: between polls
/// it yields to the runtime for `poll_interval`, so data-plane work keeps
/// making progress. The loop is bounded by `max_polls` so a task whose
/// data plane has stalled cannot hang teardown forever.
pub async fn drive_until_done<T>(
    task: &mut T,
    poll_interval: Duration,
    max_polls: u32,
) -> Result<TaskStatus>
where
    T: CooperativeTask + ?Sized,
{
    task.start();

    for _ in 0..max_polls {
        if task.is_done() {
            return Ok(task.status());
        }
        tokio::time::sleep(poll_interval).await;
    }

    warn!("poll budget exhausted after {max_polls} polls, task left running");
    Err(DriveError::PollBudgetExhausted { max_polls })
}
