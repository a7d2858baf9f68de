use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{sync::oneshot, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{errors::TaskError, model::{TaskId, TaskOutcome}};

/// Type-erased unit of work as stored in the run queue.
pub(crate) type Job = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Cooperative cancellation signal handed to every task.
///
/// Fires only when `shutdown` runs out of its grace period. Tasks are never
/// pre-empted; a task that ignores the signal keeps running.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Check point for use with `?` inside a task body.
    #[inline]
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.token.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Handle to a submitted task's outcome.
pub struct TaskHandle {
    id: TaskId,
    receiver: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, receiver: oneshot::Receiver<TaskOutcome>) -> Self {
        Self { id, receiver }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub async fn outcome_timeout(self, timeout: Duration) -> Option<TaskOutcome> {
        tokio::time::timeout(timeout, self).await.ok()
    }
}

impl Future for TaskHandle {
    type Output = TaskOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            // Sender dropped without reporting: the job never ran.
            Poll::Ready(res) => Poll::Ready(res.unwrap_or(TaskOutcome::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
