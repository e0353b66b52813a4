// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-destination serialized send queues.
//!
//! Each destination owns one worker task that runs jobs strictly one at a
//! time in enqueue order. A job moves through Idle -> Running -> {Idle |
//! Backoff}; Backoff returns to Idle once the retry delay elapses. A job that
//! hits a challenge it may not show to the user parks the queue in Blocked
//! until [`SendQueueManager::unblock`], its deadline, or cancellation.
//!
//! Every suspension point (attempt, backoff sleep, challenge wait) re-checks
//! the job's deadline and cancellation token before going further.
//!
//! A worker retires once its destination has no pending jobs; the next
//! enqueue for that destination spawns a fresh one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_config::model::QueueConfig;
use courier_core::{CourierError, DestinationId, RecipientError, SendError};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{self, Resolution};
use crate::executor::{AttemptInfo, Continuation, JobExecutor};
use crate::job::{JobPayload, SendJob};
use crate::recording;
use crate::retry::{self, RetryDecision, RetryScheduler};

/// States of one destination's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No job running.
    Idle,
    /// A job attempt is in flight.
    Running,
    /// Sleeping before the current job's next attempt.
    Backoff,
    /// The current job waits for an external challenge to be solved.
    Blocked,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueState::Idle => write!(f, "idle"),
            QueueState::Running => write!(f, "running"),
            QueueState::Backoff => write!(f, "backoff"),
            QueueState::Blocked => write!(f, "blocked"),
        }
    }
}

/// Why a job ended in failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// A non-retryable error, with the per-recipient breakdown when known.
    Send {
        error: SendError,
        errors: Vec<RecipientError>,
    },
    /// The error was retryable but the final attempt had been made.
    AttemptsExhausted { error: SendError },
    /// The deadline passed. Carries the last error seen, if any.
    DeadlineExceeded { last_error: Option<SendError> },
}

impl FailureCause {
    /// The error that ended the job, if one was seen.
    pub fn error(&self) -> Option<&SendError> {
        match self {
            FailureCause::Send { error, .. } | FailureCause::AttemptsExhausted { error } => {
                Some(error)
            }
            FailureCause::DeadlineExceeded { last_error } => last_error.as_ref(),
        }
    }

    pub fn recipient_errors(&self) -> &[RecipientError] {
        match self {
            FailureCause::Send { errors, .. } => errors,
            _ => &[],
        }
    }
}

/// Terminal result of a send job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Sent. `ignored` lists recipients whose failures did not count.
    Delivered { ignored: Vec<RecipientError> },
    Failed(FailureCause),
    /// Not attempted because the destination became invalid.
    Dropped { reason: String },
    Cancelled,
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Delivered { .. } => "delivered",
            JobOutcome::Failed(FailureCause::DeadlineExceeded { .. }) => "deadline_exceeded",
            JobOutcome::Failed(FailureCause::AttemptsExhausted { .. }) => "attempts_exhausted",
            JobOutcome::Failed(FailureCause::Send { .. }) => "failed",
            JobOutcome::Dropped { .. } => "dropped",
            JobOutcome::Cancelled => "cancelled",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, JobOutcome::Delivered { .. })
    }
}

/// Queue limits, derived from `[queue]` configuration.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Deadline budget for jobs created through [`SendQueueManager::enqueue`].
    pub max_retry_time: Duration,
    pub max_attempts: u32,
}

impl QueueSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        let max_retry_time = config.max_retry_time();
        Self {
            max_retry_time,
            max_attempts: config
                .max_attempts
                .unwrap_or_else(|| retry::max_attempts_for(max_retry_time)),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

/// Caller-side handle for one enqueued job.
#[derive(Debug)]
pub struct JobHandle {
    outcome: oneshot::Receiver<JobOutcome>,
    cancel: CancellationToken,
}

impl JobHandle {
    /// Cancel this job only. Other jobs of the destination are unaffected.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job's terminal outcome.
    pub async fn outcome(self) -> JobOutcome {
        self.outcome.await.unwrap_or(JobOutcome::Cancelled)
    }
}

struct QueuedJob {
    job: SendJob,
    reply: oneshot::Sender<JobOutcome>,
    cancel: CancellationToken,
}

/// Shared view of one destination's worker.
struct DestinationQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    state: watch::Sender<QueueState>,
    pending: AtomicUsize,
    unblock: Notify,
}

impl DestinationQueue {
    fn set_state(&self, destination: &DestinationId, state: QueueState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(destination = %destination, from = %previous, to = %state, "queue state");
        }
    }
}

/// What a worker needs to run jobs. Holds no reference back to the manager.
#[derive(Clone)]
struct WorkerContext {
    executor: Arc<dyn JobExecutor>,
    scheduler: RetryScheduler,
    max_attempts: u32,
}

type QueueMap = DashMap<DestinationId, Arc<DestinationQueue>>;

struct Inner {
    queues: Arc<QueueMap>,
    context: WorkerContext,
    settings: QueueSettings,
    shutdown: CancellationToken,
}

/// Owns one serialized queue per destination.
#[derive(Clone)]
pub struct SendQueueManager {
    inner: Arc<Inner>,
}

impl SendQueueManager {
    pub fn new(
        executor: Arc<dyn JobExecutor>,
        scheduler: RetryScheduler,
        settings: QueueSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Arc::new(DashMap::new()),
                context: WorkerContext {
                    executor,
                    scheduler,
                    max_attempts: settings.max_attempts,
                },
                settings,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Enqueue a payload with the default deadline budget.
    pub fn enqueue(
        &self,
        destination_id: DestinationId,
        payload: JobPayload,
        timestamp: u64,
    ) -> Result<JobHandle, CourierError> {
        let job = SendJob::with_budget(
            destination_id,
            payload,
            timestamp,
            self.inner.settings.max_retry_time,
        );
        self.enqueue_job(job)
    }

    /// Enqueue a fully built job. Jobs for one destination run in call order.
    pub fn enqueue_job(&self, job: SendJob) -> Result<JobHandle, CourierError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(CourierError::Cancelled);
        }
        let queue = self.queue_for(&job.destination_id, true);
        let cancel = self.inner.shutdown.child_token();
        let (reply, outcome) = oneshot::channel();
        let destination = job.destination_id.clone();
        let kind = job.kind();

        recording::job_enqueued();
        if queue
            .tx
            .send(QueuedJob {
                job,
                reply,
                cancel: cancel.clone(),
            })
            .is_err()
        {
            queue.pending.fetch_sub(1, Ordering::SeqCst);
            recording::job_finished();
            return Err(CourierError::Cancelled);
        }
        debug!(destination = %destination, %kind, "job enqueued");
        Ok(JobHandle { outcome, cancel })
    }

    /// Current state of a destination's queue.
    pub fn state(&self, destination_id: &DestinationId) -> QueueState {
        self.inner
            .queues
            .get(destination_id)
            .map(|q| *q.state.borrow())
            .unwrap_or(QueueState::Idle)
    }

    /// Watch a destination's state transitions.
    ///
    /// The receiver sees the channel close when the destination's worker retires.
    pub fn subscribe(&self, destination_id: &DestinationId) -> watch::Receiver<QueueState> {
        self.queue_for(destination_id, false).state.subscribe()
    }

    /// Jobs queued or running for a destination.
    pub fn pending(&self, destination_id: &DestinationId) -> usize {
        self.inner
            .queues
            .get(destination_id)
            .map(|q| q.pending.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Resume a destination parked on a challenge. Returns false if it was not blocked.
    pub fn unblock(&self, destination_id: &DestinationId) -> bool {
        let Some(queue) = self.inner.queues.get(destination_id) else {
            return false;
        };
        if *queue.state.borrow() != QueueState::Blocked {
            return false;
        }
        info!(destination = %destination_id, "unblocking queue");
        queue.unblock.notify_one();
        true
    }

    /// Destinations that currently have a worker.
    pub fn active_destinations(&self) -> usize {
        self.inner.queues.len()
    }

    /// Cancel every running and queued job and stop accepting new ones.
    pub fn shutdown(&self) {
        info!(queues = self.inner.queues.len(), "shutting down send queues");
        self.inner.shutdown.cancel();
    }

    /// Look up or spawn the destination's queue. With `reserve`, a pending slot
    /// is taken while the map entry is still locked, so the worker cannot
    /// retire between lookup and send.
    fn queue_for(&self, destination_id: &DestinationId, reserve: bool) -> Arc<DestinationQueue> {
        let entry = self
            .inner
            .queues
            .entry(destination_id.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let (state, _) = watch::channel(QueueState::Idle);
                let queue = Arc::new(DestinationQueue {
                    tx,
                    state,
                    pending: AtomicUsize::new(0),
                    unblock: Notify::new(),
                });
                tokio::spawn(run_worker(
                    destination_id.clone(),
                    queue.clone(),
                    rx,
                    self.inner.context.clone(),
                    self.inner.queues.clone(),
                    self.inner.shutdown.clone(),
                ));
                queue
            });
        if reserve {
            entry.pending.fetch_add(1, Ordering::SeqCst);
        }
        entry.clone()
    }
}

async fn run_worker(
    destination: DestinationId,
    queue: Arc<DestinationQueue>,
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    context: WorkerContext,
    queues: Arc<QueueMap>,
    shutdown: CancellationToken,
) {
    debug!(destination = %destination, "queue worker started");
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => next,
        };
        let Some(QueuedJob {
            mut job,
            reply,
            cancel,
        }) = next
        else {
            break;
        };

        let outcome = context.run_job(&queue, &mut job, &cancel).await;
        queue.set_state(&destination, QueueState::Idle);
        context.executor.on_finished(&job, &outcome).await;
        recording::record_job_outcome(outcome.label());
        finish(&queue, reply, outcome);

        // Enqueue reserves under the same shard lock, so a zero count here
        // means nothing is in flight for this queue.
        let retired = queues
            .remove_if(&destination, |_, current| {
                Arc::ptr_eq(current, &queue) && current.pending.load(Ordering::SeqCst) == 0
            })
            .is_some();
        if retired {
            debug!(destination = %destination, "queue idle; retiring worker");
            break;
        }
    }

    rx.close();
    while let Ok(queued) = rx.try_recv() {
        finish(&queue, queued.reply, JobOutcome::Cancelled);
    }
    queue.set_state(&destination, QueueState::Idle);
    debug!(destination = %destination, "queue worker stopped");
}

fn finish(queue: &DestinationQueue, reply: oneshot::Sender<JobOutcome>, outcome: JobOutcome) {
    queue.pending.fetch_sub(1, Ordering::SeqCst);
    recording::job_finished();
    // The caller may have dropped its handle.
    let _ = reply.send(outcome);
}

impl WorkerContext {
    /// Drive one job to a terminal outcome.
    async fn run_job(
        &self,
        queue: &DestinationQueue,
        job: &mut SendJob,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let destination = job.destination_id.clone();
        let mut last_error: Option<SendError> = None;
        let mut ignored: Vec<RecipientError> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return JobOutcome::Cancelled;
            }
            let time_remaining = job.time_remaining(Instant::now());
            if time_remaining.is_zero() {
                info!(
                    destination = %destination,
                    timestamp = job.timestamp,
                    attempt = job.attempt,
                    "job deadline exceeded; giving up"
                );
                return JobOutcome::Failed(FailureCause::DeadlineExceeded { last_error });
            }
            if let Continuation::Stop(reason) = self.executor.should_continue(job).await {
                info!(destination = %destination, kind = %job.kind(), reason, "dropping job");
                return JobOutcome::Dropped {
                    reason: reason.to_string(),
                };
            }

            job.attempt += 1;
            queue.set_state(&destination, QueueState::Running);
            let info = AttemptInfo {
                attempt: job.attempt,
                is_final_attempt: job.is_final_attempt(self.max_attempts),
                time_remaining,
            };
            recording::record_send_attempt(job.kind().label());
            debug!(
                destination = %destination,
                kind = %job.kind(),
                attempt = job.attempt,
                "running job"
            );

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return JobOutcome::Cancelled,
                _ = tokio::time::sleep_until(job.deadline) => {
                    warn!(destination = %destination, attempt = job.attempt, "deadline passed mid-attempt");
                    return JobOutcome::Failed(FailureCause::DeadlineExceeded { last_error });
                }
                attempt = self.executor.execute(job, &info) => attempt,
            };

            match classify::resolve(attempt.destination_kind, attempt.outcome) {
                Resolution::Delivered { ignored: errors } => {
                    ignored.extend(errors);
                    debug!(destination = %destination, attempt = job.attempt, "job delivered");
                    return JobOutcome::Delivered { ignored };
                }
                Resolution::Fail { error, errors } => {
                    warn!(destination = %destination, error = %error, "job failed");
                    return JobOutcome::Failed(FailureCause::Send { error, errors });
                }
                Resolution::Retry {
                    error,
                    delay_hint,
                    recipients,
                    ignored: errors,
                } => {
                    ignored.extend(errors);
                    if recipients.is_some() {
                        job.recipient_filter = recipients;
                    }
                    if info.is_final_attempt {
                        warn!(
                            destination = %destination,
                            attempt = job.attempt,
                            error = %error,
                            "final attempt failed"
                        );
                        return JobOutcome::Failed(FailureCause::AttemptsExhausted { error });
                    }

                    let remaining = job.time_remaining(Instant::now());
                    let decision = self.scheduler.delay_for(delay_hint, remaining);
                    last_error = Some(error);
                    let RetryDecision::Sleep(delay) = decision else {
                        info!(destination = %destination, "no time left to retry");
                        return JobOutcome::Failed(FailureCause::DeadlineExceeded { last_error });
                    };

                    info!(
                        destination = %destination,
                        attempt = job.attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after backoff"
                    );
                    recording::record_retry_delay(delay);
                    queue.set_state(&destination, QueueState::Backoff);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return JobOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    queue.set_state(&destination, QueueState::Idle);
                }
                Resolution::Challenge {
                    error,
                    retry_after,
                    recipients,
                    errors,
                    ignored: others,
                } => {
                    if job.kind().shows_captcha() {
                        warn!(destination = %destination, "challenge required; reporting to user");
                        return JobOutcome::Failed(FailureCause::Send { error, errors });
                    }
                    ignored.extend(others);
                    if recipients.is_some() {
                        job.recipient_filter = recipients;
                    }
                    last_error = Some(error);

                    info!(destination = %destination, kind = %job.kind(), "challenge required; queue blocked");
                    self.executor.on_blocked(job, retry_after).await;
                    queue.set_state(&destination, QueueState::Blocked);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return JobOutcome::Cancelled,
                        _ = tokio::time::sleep_until(job.deadline) => {
                            info!(destination = %destination, "deadline passed while blocked");
                            return JobOutcome::Failed(FailureCause::DeadlineExceeded { last_error });
                        }
                        _ = queue.unblock.notified() => {
                            debug!(destination = %destination, "challenge resolved; resuming");
                        }
                    }
                    queue.set_state(&destination, QueueState::Idle);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use courier_core::{DestinationKind, SendOutcome, ServiceId};
    use tracing_test::traced_test;

    use super::*;
    use crate::executor::Attempt;

    #[derive(Default)]
    struct ScriptedExecutor {
        outcomes: Mutex<VecDeque<SendOutcome>>,
        attempts: Mutex<Vec<u64>>,
        stop: Option<&'static str>,
        group: bool,
        /// Attempts for this job timestamp never complete.
        hang_on: Option<u64>,
    }

    impl ScriptedExecutor {
        fn with(outcomes: Vec<SendOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Self::default()
            })
        }

        fn group(outcomes: Vec<SendOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                group: true,
                ..Self::default()
            })
        }

        fn attempts(&self) -> Vec<u64> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobExecutor for ScriptedExecutor {
        async fn should_continue(&self, _job: &SendJob) -> Continuation {
            match self.stop {
                Some(reason) => Continuation::Stop(reason),
                None => Continuation::Proceed,
            }
        }

        async fn execute(&self, job: &SendJob, _info: &AttemptInfo) -> Attempt {
            self.attempts.lock().unwrap().push(job.timestamp);
            if self.hang_on == Some(job.timestamp) {
                std::future::pending::<()>().await;
            }
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(SendOutcome::Success);
            Attempt {
                destination_kind: if self.group {
                    DestinationKind::Group
                } else {
                    DestinationKind::Direct
                },
                outcome,
            }
        }
    }

    fn manager(executor: Arc<ScriptedExecutor>, max_attempts: u32) -> SendQueueManager {
        SendQueueManager::new(
            executor,
            RetryScheduler::default(),
            QueueSettings {
                max_retry_time: Duration::from_secs(3600),
                max_attempts,
            },
        )
    }

    fn dest() -> DestinationId {
        DestinationId::from("c-bob")
    }

    fn server_error() -> SendOutcome {
        SendOutcome::retryable(SendError::NetworkOrServer {
            code: Some(500),
            message: "unavailable".into(),
        })
    }

    fn recipient(id: &str, error: SendError) -> RecipientError {
        RecipientError::new(ServiceId::from(id), error)
    }

    fn challenged(id: &str) -> RecipientError {
        recipient(
            id,
            SendError::ChallengeRequired {
                service_id: ServiceId::from(id),
                retry_after: None,
                token: None,
            },
        )
    }

    fn unregistered(id: &str) -> RecipientError {
        recipient(
            id,
            SendError::UnregisteredUser {
                service_id: ServiceId::from(id),
            },
        )
    }

    fn challenge() -> SendOutcome {
        SendOutcome::Fatal(SendError::ChallengeRequired {
            service_id: ServiceId::from("bob"),
            retry_after: Some(Duration::from_secs(30)),
            token: None,
        })
    }

    #[test]
    fn default_settings_derive_attempts_from_budget() {
        let settings = QueueSettings::default();
        assert_eq!(settings.max_retry_time, Duration::from_secs(86_400));
        assert_eq!(
            settings.max_attempts,
            retry::max_attempts_for(Duration::from_secs(86_400))
        );
    }

    #[test]
    fn explicit_attempt_cap_wins() {
        let config = QueueConfig {
            max_attempts: Some(3),
            ..QueueConfig::default()
        };
        assert_eq!(QueueSettings::from_config(&config).max_attempts, 3);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(
            JobOutcome::Failed(FailureCause::DeadlineExceeded { last_error: None }).label(),
            "deadline_exceeded"
        );
        assert_eq!(JobOutcome::Cancelled.label(), "cancelled");
        assert_eq!(QueueState::Backoff.to_string(), "backoff");
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_for_one_destination_run_in_enqueue_order() {
        let executor = ScriptedExecutor::with(vec![server_error()]);
        let manager = manager(executor.clone(), 10);

        let first = manager.enqueue(dest(), JobPayload::NullMessage, 100).unwrap();
        let second = manager.enqueue(dest(), JobPayload::NullMessage, 200).unwrap();
        assert_eq!(manager.pending(&dest()), 2);

        assert!(first.outcome().await.is_delivered());
        assert!(second.outcome().await.is_delivered());
        // The retry of 100 happens before 200 is ever attempted.
        assert_eq!(executor.attempts(), vec![100, 100, 200]);
        assert_eq!(manager.pending(&dest()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_clamped_to_the_deadline() {
        let executor = ScriptedExecutor::with(vec![SendOutcome::retryable(SendError::RateLimited {
            code: 429,
            retry_after: Some(Duration::from_secs(10)),
        })]);
        let manager = manager(executor.clone(), 10);
        let start = Instant::now();

        let job = SendJob::with_budget(dest(), JobPayload::NullMessage, 100, Duration::from_millis(5000));
        let outcome = manager.enqueue_job(job).unwrap().outcome().await;

        match outcome {
            JobOutcome::Failed(FailureCause::DeadlineExceeded {
                last_error: Some(SendError::RateLimited { code: 429, .. }),
            }) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(executor.attempts().len(), 1);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(5000), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(6000), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn final_attempt_converts_retryable_to_failure() {
        let executor = ScriptedExecutor::with(vec![server_error()]);
        let manager = manager(executor.clone(), 1);

        let outcome = manager
            .enqueue(dest(), JobPayload::NullMessage, 100)
            .unwrap()
            .outcome()
            .await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed(FailureCause::AttemptsExhausted { .. })
        ));
        assert_eq!(executor.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn invalid_destination_drops_without_attempt() {
        let executor = Arc::new(ScriptedExecutor {
            stop: Some("destination is blocked"),
            ..ScriptedExecutor::default()
        });
        let manager = manager(executor.clone(), 10);

        let outcome = manager
            .enqueue(dest(), JobPayload::NullMessage, 100)
            .unwrap()
            .outcome()
            .await;
        assert_eq!(
            outcome,
            JobOutcome::Dropped {
                reason: "destination is blocked".into()
            }
        );
        assert!(executor.attempts().is_empty());
        assert!(logs_contain("dropping job"));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_cancels_a_job_in_backoff() {
        let executor = ScriptedExecutor::with(vec![server_error()]);
        let manager = manager(executor.clone(), 10);
        let mut state = manager.subscribe(&dest());

        let handle = manager.enqueue(dest(), JobPayload::NullMessage, 100).unwrap();
        state
            .wait_for(|s| *s == QueueState::Backoff)
            .await
            .unwrap();
        handle.abort();

        assert_eq!(handle.outcome().await, JobOutcome::Cancelled);
        assert_eq!(executor.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_challenge_parks_queue_until_unblocked() {
        let executor = ScriptedExecutor::with(vec![challenge()]);
        let manager = manager(executor.clone(), 10);
        let mut state = manager.subscribe(&dest());

        let parked = manager.enqueue(dest(), JobPayload::NullMessage, 100).unwrap();
        let behind = manager.enqueue(dest(), JobPayload::NullMessage, 200).unwrap();
        state
            .wait_for(|s| *s == QueueState::Blocked)
            .await
            .unwrap();
        assert_eq!(manager.state(&dest()), QueueState::Blocked);
        assert_eq!(executor.attempts(), vec![100]);

        assert!(manager.unblock(&dest()));
        assert!(parked.outcome().await.is_delivered());
        assert!(behind.outcome().await.is_delivered());
        assert_eq!(executor.attempts(), vec![100, 100, 200]);
        assert!(!manager.unblock(&dest()));
    }

    #[tokio::test(start_paused = true)]
    async fn visible_challenge_fails_instead_of_parking() {
        let executor = ScriptedExecutor::with(vec![challenge()]);
        let manager = manager(executor.clone(), 10);

        let payload = JobPayload::UserMessage {
            body: "hello".into(),
            content_hint: courier_core::ContentHint::Resendable,
        };
        let outcome = manager.enqueue(dest(), payload, 100).unwrap().outcome().await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed(FailureCause::Send {
                error: SendError::ChallengeRequired { .. },
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_job_gives_up_at_its_deadline() {
        let executor = ScriptedExecutor::with(vec![challenge()]);
        let manager = manager(executor.clone(), 10);

        let job = SendJob::with_budget(dest(), JobPayload::NullMessage, 100, Duration::from_secs(90));
        let outcome = manager.enqueue_job(job).unwrap().outcome().await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed(FailureCause::DeadlineExceeded {
                last_error: Some(SendError::ChallengeRequired { .. })
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_queued_work_and_refuses_new_jobs() {
        let executor = ScriptedExecutor::with(vec![server_error()]);
        let manager = manager(executor.clone(), 10);
        let mut state = manager.subscribe(&dest());

        let running = manager.enqueue(dest(), JobPayload::NullMessage, 100).unwrap();
        let queued = manager.enqueue(dest(), JobPayload::NullMessage, 200).unwrap();
        state
            .wait_for(|s| *s == QueueState::Backoff)
            .await
            .unwrap();
        manager.shutdown();

        assert_eq!(running.outcome().await, JobOutcome::Cancelled);
        assert_eq!(queued.outcome().await, JobOutcome::Cancelled);
        assert!(matches!(
            manager.enqueue(dest(), JobPayload::NullMessage, 300),
            Err(CourierError::Cancelled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn challenge_does_not_hide_a_fatal_recipient() {
        let batch = vec![
            challenged("a"),
            recipient("b", SendError::Fatal("bad envelope".into())),
            unregistered("c"),
        ];
        let executor = ScriptedExecutor::group(vec![SendOutcome::PartialFailure(batch.clone())]);
        let manager = manager(executor.clone(), 10);

        let outcome = manager
            .enqueue(dest(), JobPayload::NullMessage, 100)
            .unwrap()
            .outcome()
            .await;
        assert_eq!(
            outcome,
            JobOutcome::Failed(FailureCause::Send {
                error: SendError::Fatal("bad envelope".into()),
                errors: batch,
            })
        );
        assert_eq!(executor.attempts(), vec![100]);
    }

    #[tokio::test(start_paused = true)]
    async fn parked_group_job_keeps_its_ignored_recipients() {
        let executor = ScriptedExecutor::group(vec![SendOutcome::PartialFailure(vec![
            challenged("a"),
            unregistered("c"),
        ])]);
        let manager = manager(executor.clone(), 10);
        let mut state = manager.subscribe(&dest());

        let handle = manager.enqueue(dest(), JobPayload::NullMessage, 100).unwrap();
        state
            .wait_for(|s| *s == QueueState::Blocked)
            .await
            .unwrap();
        assert!(manager.unblock(&dest()));

        assert_eq!(
            handle.outcome().await,
            JobOutcome::Delivered {
                ignored: vec![unregistered("c")]
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_gives_up_at_the_deadline() {
        let executor = Arc::new(ScriptedExecutor {
            hang_on: Some(100),
            ..ScriptedExecutor::default()
        });
        let manager = manager(executor.clone(), 10);
        let start = Instant::now();

        let job = SendJob::with_budget(dest(), JobPayload::NullMessage, 100, Duration::from_secs(5));
        let hung = manager.enqueue_job(job).unwrap();
        let behind = manager.enqueue(dest(), JobPayload::NullMessage, 200).unwrap();

        assert_eq!(
            hung.outcome().await,
            JobOutcome::Failed(FailureCause::DeadlineExceeded { last_error: None })
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(6), "elapsed {elapsed:?}");

        assert!(behind.outcome().await.is_delivered());
        assert_eq!(executor.attempts(), vec![100, 200]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_destinations_release_their_workers() {
        let executor = ScriptedExecutor::with(Vec::new());
        let manager = manager(executor.clone(), 10);

        let handles: Vec<_> = (0..50u64)
            .map(|n| {
                let destination = DestinationId::from(format!("c-{n}").as_str());
                manager.enqueue(destination, JobPayload::NullMessage, n).unwrap()
            })
            .collect();
        assert_eq!(manager.active_destinations(), 50);

        for handle in handles {
            assert!(handle.outcome().await.is_delivered());
        }
        tokio::task::yield_now().await;
        assert_eq!(manager.active_destinations(), 0);

        // A retired destination gets a fresh worker on the next enqueue.
        let again = manager
            .enqueue(DestinationId::from("c-7"), JobPayload::NullMessage, 99)
            .unwrap();
        assert!(again.outcome().await.is_delivered());
        tokio::task::yield_now().await;
        assert_eq!(manager.active_destinations(), 0);
        assert_eq!(executor.attempts().len(), 51);
    }
}
