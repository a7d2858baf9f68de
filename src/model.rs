use std::fmt;

use tokio::time::Duration;

use crate::errors::TaskError;

/// Identifier assigned at submission, increasing in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle of a runner. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunnerState {
    Accepting,
    Draining,
    Stopped,
}

impl RunnerState {
    pub fn can_transition_to(self, next: RunnerState) -> bool {
        matches!(
            (self, next),
            (RunnerState::Accepting, RunnerState::Draining)
                | (RunnerState::Draining, RunnerState::Stopped)
        )
    }

    pub fn is_accepting(self) -> bool {
        self == RunnerState::Accepting
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunnerState::Accepting => "accepting",
            RunnerState::Draining => "draining",
            RunnerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Terminal result of one task. Recorded exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed(TaskError),
    Cancelled,
}

impl TaskOutcome {
    pub(crate) fn from_result(result: Result<(), TaskError>) -> Self {
        match result {
            Ok(()) => TaskOutcome::Succeeded,
            Err(TaskError::Cancelled) => TaskOutcome::Cancelled,
            Err(e) => TaskOutcome::Failed(e),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every accepted task finished inside the grace period.
    Clean,
    /// The grace period ran out; stragglers were signalled and the queue discarded.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub outcome: ShutdownOutcome,
    pub elapsed: Duration,
    /// Accepted tasks discarded without running, whether still queued or
    /// already claimed by a worker when the runner stopped.
    pub cancelled_queued: usize,
    /// Tasks still running when shutdown returned.
    pub abandoned_running: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.outcome == ShutdownOutcome::Clean
    }
}

#[derive(Debug, Clone)]
pub struct RunnerMetrics {
    pub workers: usize,
    pub running: usize,
    pub idle_workers: usize,
    pub queued: usize,
    pub peak_running: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RunnerMetrics {
    pub fn utilization(&self) -> f64 {
        if self.workers == 0 {
            return 0.0;
        }
        self.running as f64 / self.workers as f64
    }

    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.finished();
        if total == 0 {
            return 1.0;
        }
        self.succeeded as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_moves_forward_only() {
        use RunnerState::*;
        assert!(Accepting.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Stopped));
        assert!(!Accepting.can_transition_to(Stopped));
        assert!(!Draining.can_transition_to(Accepting));
        assert!(!Stopped.can_transition_to(Draining));
        assert!(!Stopped.can_transition_to(Stopped));
    }

    #[test]
    fn outcome_from_task_result() {
        assert_eq!(TaskOutcome::from_result(Ok(())), TaskOutcome::Succeeded);
        assert_eq!(
            TaskOutcome::from_result(Err(TaskError::Cancelled)),
            TaskOutcome::Cancelled
        );
        assert!(TaskOutcome::from_result(Err(TaskError::msg("boom"))).is_failed());
    }

    #[test]
    fn metrics_rates() {
        let m = RunnerMetrics {
            workers: 4,
            running: 2,
            idle_workers: 2,
            queued: 0,
            peak_running: 4,
            submitted: 10,
            succeeded: 6,
            failed: 1,
            cancelled: 1,
        };
        assert_eq!(m.finished(), 8);
        assert!((m.utilization() - 0.5).abs() < f64::EPSILON);
        assert!((m.success_rate() - 0.75).abs() < f64::EPSILON);
    }
}
