use super::{
    config::Config,
    errors::{ConfigError, SubmitError, TaskError},
    handle::{CancelSignal, Job, TaskHandle},
    model::{RunnerMetrics, RunnerState, ShutdownOutcome, ShutdownReport, TaskId, TaskOutcome},
};
use std::{
    fmt::Display,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};
use crossbeam::deque::{Injector, Steal};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::{oneshot, watch, Notify},
    task::JoinHandle,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

struct QueuedTask {
    id: TaskId,
    job: Job,
    reply: oneshot::Sender<TaskOutcome>,
}

/// Fixed-size worker pool with a three-state shutdown protocol.
///
/// Tasks are queued without limit and executed by exactly `workers` worker
/// loops. `shutdown` refuses new work, waits up to a grace period for the
/// queue to drain, and on timeout signals cooperative cancellation to the
/// running tasks and discards whatever is still queued.
///
/// Must be constructed inside a tokio runtime.
pub struct BoundedTaskRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    config: Config,
    runtime: Handle,
    /// Guards every state transition and every push onto `inject`.
    state: Mutex<RunnerState>,
    inject: Injector<QueuedTask>,
    task_ready: Notify,
    drained: Notify,
    /// Idle workers exit once this fires.
    stop: CancellationToken,
    /// Parent of every task's `CancelSignal`.
    cancel: CancellationToken,
    next_id: AtomicU64,
    /// Queued plus running.
    pending: AtomicUsize,
    queued: AtomicUsize,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    /// Workers between taking a task and passing the start gate.
    claiming: AtomicUsize,
    /// Claimed tasks turned away at the start gate after stop.
    gate_cancelled: AtomicUsize,
    idle_workers: AtomicUsize,
    submitted: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Set once by the drain task; every `shutdown` caller waits on it.
    report: watch::Sender<Option<ShutdownReport>>,
}

impl BoundedTaskRunner {
    /// Runner with `workers` worker loops and the default grace period.
    ///
    /// Zero and negative counts are rejected.
    pub fn new<N>(workers: N) -> Result<Self, ConfigError>
    where
        N: TryInto<usize> + Copy + Display,
    {
        let count = workers
            .try_into()
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| ConfigError::InvalidWorkerCount(workers.to_string()))?;
        Self::with_config(Config::default().with_workers(count))
    }

    pub fn with_config(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let inner = Arc::new(RunnerInner {
            runtime,
            state: Mutex::new(RunnerState::Accepting),
            inject: Injector::new(),
            task_ready: Notify::new(),
            drained: Notify::new(),
            stop: CancellationToken::new(),
            cancel: CancellationToken::new(),
            next_id: AtomicU64::new(1),
            pending: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            claiming: AtomicUsize::new(0),
            gate_cancelled: AtomicUsize::new(0),
            idle_workers: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            workers: Mutex::new(Vec::with_capacity(config.workers)),
            report: watch::channel(None).0,
            config,
        });

        let handles: Vec<_> = (0..inner.config.workers)
            .map(|worker| {
                let inner = inner.clone();
                inner
                    .runtime
                    .clone()
                    .spawn(async move { inner.worker_loop(worker).await })
            })
            .collect();
        *inner.workers.lock() = handles;

        info!(workers = inner.config.workers, "runner started");
        Ok(Self { inner })
    }

    /// Queue an async task. Returns as soon as the task is queued.
    ///
    /// The closure receives the task's [`CancelSignal`]; returning
    /// `Err(TaskError::Cancelled)` records the task as cancelled.
    pub fn submit<F, Fut>(&self, f: F) -> Result<TaskHandle, SubmitError>
    where
        F: FnOnce(CancelSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let signal = CancelSignal::new(self.inner.cancel.child_token());
        self.inner.enqueue(Box::pin(async move { f(signal).await }))
    }

    /// Queue a blocking closure. It runs on the blocking thread pool while
    /// the worker that claimed it stays busy.
    pub fn submit_blocking<F>(&self, f: F) -> Result<TaskHandle, SubmitError>
    where
        F: FnOnce(CancelSignal) -> Result<(), TaskError> + Send + 'static,
    {
        let signal = CancelSignal::new(self.inner.cancel.child_token());
        self.inner.enqueue(Box::pin(async move {
            let res = tokio::task::spawn_blocking(move || {
                std::panic::catch_unwind(AssertUnwindSafe(move || f(signal)))
            })
            .await;
            match res {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => Err(TaskError::from_panic(panic)),
                Err(join_err) => Err(TaskError::msg(join_err)),
            }
        }))
    }

    /// Stop accepting tasks and wait up to `grace` for the queue to drain.
    ///
    /// The first call starts the drain as a background task, so it runs to
    /// completion even if this future is dropped. Repeated or concurrent calls
    /// wait for that same drain and return its report; their `grace` is ignored.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let mut rx = self.inner.report.subscribe();

        let leader = {
            let mut state = self.inner.state.lock();
            if state.can_transition_to(RunnerState::Draining) {
                info!(from = %*state, to = %RunnerState::Draining, "runner state changed");
                *state = RunnerState::Draining;
                true
            } else {
                false
            }
        };
        if leader {
            let inner = self.inner.clone();
            self.inner.runtime.spawn(async move {
                let report = inner.drain(grace).await;
                inner.report.send_replace(Some(report));
            });
        }

        let report = match rx.wait_for(Option::is_some).await {
            Ok(report) => (*report).clone().unwrap_or_else(|| self.inner.stopped_report()),
            // The sender lives in `inner`, which `self` keeps alive.
            Err(_) => self.inner.stopped_report(),
        };
        report
    }

    pub async fn shutdown_default(&self) -> ShutdownReport {
        self.shutdown(self.inner.config.grace_period).await
    }

    #[inline]
    pub fn state(&self) -> RunnerState {
        *self.inner.state.lock()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[inline]
    pub fn metrics(&self) -> RunnerMetrics {
        self.inner.metrics()
    }

    /// Hand a metrics snapshot to `callback` every `interval`.
    ///
    /// Runs until the returned token is cancelled or the runner stops.
    pub fn start_monitoring<F>(&self, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(RunnerMetrics) + Send + 'static,
    {
        let inner = self.inner.clone();
        let token = self.inner.stop.child_token();
        let token_clone = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => callback(inner.metrics()),
                    _ = token_clone.cancelled() => break,
                }
            }
        });

        token
    }
}

impl Drop for BoundedTaskRunner {
    fn drop(&mut self) {
        // Workers finish whatever is queued, then exit.
        self.inner.stop.cancel();
    }
}

impl RunnerInner {
    fn metrics(&self) -> RunnerMetrics {
        RunnerMetrics {
            workers: self.config.workers,
            running: self.running.load(Ordering::Relaxed),
            idle_workers: self.idle_workers.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            peak_running: self.peak_running.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    fn stopped_report(&self) -> ShutdownReport {
        ShutdownReport {
            outcome: ShutdownOutcome::TimedOut,
            elapsed: Duration::ZERO,
            cancelled_queued: 0,
            abandoned_running: self.running.load(Ordering::Acquire),
        }
    }

    fn enqueue(&self, job: Job) -> Result<TaskHandle, SubmitError> {
        let state = self.state.lock();
        if !state.is_accepting() {
            debug!(state = %*state, "submission rejected");
            return Err(SubmitError::RunnerClosed(*state));
        }

        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply, rx) = oneshot::channel();
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.queued.fetch_add(1, Ordering::Relaxed);
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.inject.push(QueuedTask { id, job, reply });
        drop(state);

        self.task_ready.notify_one();
        trace!(task_id = %id, "task queued");
        Ok(TaskHandle::new(id, rx))
    }

    fn steal(&self) -> Option<QueuedTask> {
        loop {
            match self.inject.steal() {
                Steal::Success(task) => {
                    self.queued.fetch_sub(1, Ordering::Relaxed);
                    return Some(task);
                }
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
    }

    async fn worker_loop(&self, worker: usize) {
        trace!(worker, "worker started");
        loop {
            // Counted before the pop so a drain never misses a claimed task.
            self.claiming.fetch_add(1, Ordering::SeqCst);
            if let Some(task) = self.steal() {
                self.run(worker, task).await;
                continue;
            }
            self.claiming.fetch_sub(1, Ordering::SeqCst);
            if self.stop.is_cancelled() {
                break;
            }

            self.idle_workers.fetch_add(1, Ordering::Relaxed);
            tokio::select! {
                _ = self.task_ready.notified() => {}
                _ = self.stop.cancelled() => {}
            }
            self.idle_workers.fetch_sub(1, Ordering::Relaxed);
        }
        trace!(worker, "worker exited");
    }

    async fn run(&self, worker: usize, task: QueuedTask) {
        let QueuedTask { id, job, reply } = task;

        // Start gate: nothing starts once the runner is stopped.
        {
            let state = self.state.lock();
            if *state == RunnerState::Stopped {
                drop(state);
                self.gate_cancelled.fetch_add(1, Ordering::SeqCst);
                self.claiming.fetch_sub(1, Ordering::SeqCst);
                debug!(task_id = %id, worker, "task discarded after stop");
                self.finish(reply, TaskOutcome::Cancelled);
                return;
            }
            let running = self.running.fetch_add(1, Ordering::AcqRel) + 1;
            self.peak_running.fetch_max(running, Ordering::AcqRel);
            self.claiming.fetch_sub(1, Ordering::SeqCst);
        }

        debug!(task_id = %id, worker, "task started");
        let result = AssertUnwindSafe(job)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TaskError::from_panic(panic)));
        self.running.fetch_sub(1, Ordering::AcqRel);

        let outcome = TaskOutcome::from_result(result);
        match &outcome {
            TaskOutcome::Succeeded => debug!(task_id = %id, worker, "task finished"),
            TaskOutcome::Cancelled => debug!(task_id = %id, worker, "task cancelled"),
            TaskOutcome::Failed(err) => warn!(task_id = %id, worker, error = %err, "task failed"),
        }
        self.finish(reply, outcome);
    }

    fn finish(&self, reply: oneshot::Sender<TaskOutcome>, outcome: TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Succeeded => &self.succeeded,
            TaskOutcome::Failed(_) => &self.failed,
            TaskOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        // The submitter may have dropped its handle.
        let _ = reply.send(outcome);

        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn transition(&self, next: RunnerState) {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            info!(from = %*state, to = %next, "runner state changed");
            *state = next;
        }
    }

    async fn drain(&self, grace: Duration) -> ShutdownReport {
        let started = Instant::now();
        info!(
            grace_ms = grace.as_millis() as u64,
            pending = self.pending.load(Ordering::Relaxed),
            "draining"
        );

        let drained = tokio::time::timeout(grace, self.wait_drained()).await.is_ok();
        self.transition(RunnerState::Stopped);

        if drained || self.pending.load(Ordering::Acquire) == 0 {
            self.stop.cancel();
            self.join_workers().await;
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "runner stopped cleanly");
            return ShutdownReport {
                outcome: ShutdownOutcome::Clean,
                elapsed: started.elapsed(),
                cancelled_queued: 0,
                abandoned_running: 0,
            };
        }

        self.cancel.cancel();
        let mut swept = 0;
        while let Some(task) = self.steal() {
            debug!(task_id = %task.id, "queued task discarded");
            self.finish(task.reply, TaskOutcome::Cancelled);
            swept += 1;
        }
        self.stop.cancel();

        // Tasks already claimed by a worker reach the start gate without
        // awaiting; wait for them so they are counted as discarded, not lost.
        while self.claiming.load(Ordering::SeqCst) > 0 {
            tokio::task::yield_now().await;
        }
        let cancelled_queued = swept + self.gate_cancelled.load(Ordering::SeqCst);

        let abandoned_running = self.running.load(Ordering::Acquire);
        warn!(
            grace_ms = grace.as_millis() as u64,
            cancelled_queued,
            abandoned_running,
            "shutdown timed out, cancellation signalled"
        );
        ShutdownReport {
            outcome: ShutdownOutcome::TimedOut,
            elapsed: started.elapsed(),
            cancelled_queued,
            abandoned_running,
        }
    }

    async fn join_workers(&self) {
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker join failed");
            }
        }
    }
}
