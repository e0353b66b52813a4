// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The seam between the queue state machine and the send machinery.
//!
//! [`SendQueueManager`](crate::queue::SendQueueManager) only knows about
//! jobs, attempts and outcomes. [`PipelineExecutor`] resolves destinations,
//! runs the send, and turns terminal outcomes into sink reports.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{
    ConversationKind, ConversationStore, DeliverySink, DestinationKind, LocalIdentity,
    RecipientError, SendError, SendOutcome, ServiceId,
};
use tracing::{debug, info, warn};

use crate::classify;
use crate::job::{JobPayload, SendJob};
use crate::queue::{FailureCause, JobOutcome};
use crate::resend::ResendFollowUp;
use crate::sender::{MessageSender, OutgoingMessage};

/// Whether a job should still be attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    Proceed,
    Stop(&'static str),
}

/// Per-attempt facts the executor may use.
#[derive(Debug, Clone, Copy)]
pub struct AttemptInfo {
    pub attempt: u32,
    pub is_final_attempt: bool,
    pub time_remaining: Duration,
}

/// Result of one executed attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub destination_kind: DestinationKind,
    pub outcome: SendOutcome,
}

impl Attempt {
    pub fn direct(outcome: SendOutcome) -> Self {
        Self {
            destination_kind: DestinationKind::Direct,
            outcome,
        }
    }
}

/// Runs job attempts on behalf of a destination queue.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    /// Checked before every attempt, after the deadline check.
    async fn should_continue(&self, job: &SendJob) -> Continuation;

    /// Perform one attempt. Never called with an exhausted deadline.
    async fn execute(&self, job: &SendJob, info: &AttemptInfo) -> Attempt;

    /// The queue parked `job` on a challenge it will not show to the user.
    async fn on_blocked(&self, _job: &SendJob, _retry_after: Option<Duration>) {}

    /// `job` reached a terminal outcome.
    async fn on_finished(&self, _job: &SendJob, _outcome: &JobOutcome) {}
}

/// Production executor backed by [`MessageSender`].
pub struct PipelineExecutor {
    our: LocalIdentity,
    conversations: Arc<dyn ConversationStore>,
    sink: Arc<dyn DeliverySink>,
    sender: Arc<MessageSender>,
    follow_up: Arc<ResendFollowUp>,
}

impl PipelineExecutor {
    pub fn new(
        our: LocalIdentity,
        conversations: Arc<dyn ConversationStore>,
        sink: Arc<dyn DeliverySink>,
        sender: Arc<MessageSender>,
        follow_up: Arc<ResendFollowUp>,
    ) -> Self {
        Self {
            our,
            conversations,
            sink,
            sender,
            follow_up,
        }
    }

    async fn report_failures(
        &self,
        job: &SendJob,
        error: Option<&SendError>,
        errors: &[RecipientError],
    ) {
        let kind = job.kind();
        let mut untrusted: Vec<ServiceId> = errors
            .iter()
            .filter_map(|e| match &e.error {
                SendError::UntrustedIdentity { service_id } => Some(service_id.clone()),
                _ => None,
            })
            .collect();
        if let Some(SendError::UntrustedIdentity { service_id }) = error {
            if !untrusted.contains(service_id) {
                untrusted.push(service_id.clone());
            }
        }

        if !untrusted.is_empty() {
            if kind.cancels_on_untrusted() {
                info!(
                    destination = %job.destination_id,
                    %kind,
                    "identity changed; cancelling job silently"
                );
                return;
            }
            self.sink
                .report_untrusted_identity(&job.destination_id, &untrusted)
                .await;
        }

        if !kind.is_user_visible() {
            return;
        }
        let breakdown = match (errors.is_empty(), error) {
            (true, Some(error)) => self.direct_breakdown(job, error).await,
            _ => errors.to_vec(),
        };
        self.sink
            .report_send_failed(&job.destination_id, job.timestamp, &breakdown)
            .await;
    }

    /// Attribute a job-level error to the direct recipient, when there is one.
    async fn direct_breakdown(&self, job: &SendJob, error: &SendError) -> Vec<RecipientError> {
        match self.conversations.get(&job.destination_id).await {
            Ok(Some(conversation)) => match conversation.kind {
                ConversationKind::Direct { service_id } => {
                    vec![RecipientError::new(service_id, error.clone())]
                }
                ConversationKind::Group { .. } => Vec::new(),
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(destination = %job.destination_id, error = %e, "conversation lookup failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl JobExecutor for PipelineExecutor {
    async fn should_continue(&self, job: &SendJob) -> Continuation {
        let conversation = match self.conversations.get(&job.destination_id).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => return Continuation::Stop("destination not found"),
            Err(e) => {
                // Let the attempt surface the storage failure.
                warn!(destination = %job.destination_id, error = %e, "conversation lookup failed");
                return Continuation::Proceed;
            }
        };
        if conversation.is_blocked {
            return Continuation::Stop("destination is blocked");
        }
        if conversation.is_unregistered && conversation.destination_kind() == DestinationKind::Direct {
            return Continuation::Stop("recipient is unregistered");
        }
        if !conversation.is_accepted && job.kind().requires_accepted() {
            return Continuation::Stop("conversation not accepted");
        }
        Continuation::Proceed
    }

    async fn execute(&self, job: &SendJob, info: &AttemptInfo) -> Attempt {
        let conversation = match self.conversations.get(&job.destination_id).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => {
                return Attempt::direct(SendOutcome::Fatal(SendError::Fatal(format!(
                    "destination {} not found",
                    job.destination_id
                ))));
            }
            Err(e) => return Attempt::direct(SendOutcome::Fatal(SendError::Fatal(e.to_string()))),
        };
        let content = match job.payload.encode(job.timestamp) {
            Ok(content) => content,
            Err(e) => return Attempt::direct(SendOutcome::Fatal(SendError::Fatal(e.to_string()))),
        };
        let plaintext_device = match &job.payload {
            JobPayload::ResendRequest(request) => Some(request.sender_device),
            _ => None,
        };
        let message = OutgoingMessage {
            content,
            timestamp: job.timestamp,
            plaintext_device,
        };

        debug!(
            destination = %job.destination_id,
            attempt = info.attempt,
            final_attempt = info.is_final_attempt,
            time_remaining_ms = info.time_remaining.as_millis() as u64,
            "executing send"
        );
        match &conversation.kind {
            ConversationKind::Direct { service_id } => {
                Attempt::direct(self.sender.send_direct(service_id, &message).await)
            }
            ConversationKind::Group { group_id, members } => {
                let recipients: Vec<ServiceId> = members
                    .iter()
                    .filter(|member| **member != self.our.service_id && job.targets(member))
                    .cloned()
                    .collect();
                Attempt {
                    destination_kind: DestinationKind::Group,
                    outcome: self.sender.send_group(group_id, &recipients, &message).await,
                }
            }
        }
    }

    async fn on_blocked(&self, job: &SendJob, retry_after: Option<Duration>) {
        self.sink
            .report_challenge(&job.destination_id, false, retry_after)
            .await;
    }

    async fn on_finished(&self, job: &SendJob, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Delivered { ignored } => {
                if !ignored.is_empty() {
                    self.report_failures(job, None, ignored).await;
                }
                if let JobPayload::ResendRequest(request) = &job.payload {
                    self.follow_up
                        .after_sent(&job.destination_id, request)
                        .await;
                }
            }
            JobOutcome::Failed(cause) => {
                if let FailureCause::Send {
                    error: SendError::ChallengeRequired { retry_after, .. },
                    ..
                } = cause
                {
                    self.sink
                        .report_challenge(&job.destination_id, true, *retry_after)
                        .await;
                }
                self.report_failures(job, cause.error(), cause.recipient_errors())
                    .await;

                if let JobPayload::ResendRequest(request) = &job.payload {
                    let ignorable = cause
                        .error()
                        .is_some_and(|e| classify::is_ignorable(DestinationKind::Direct, e))
                        && !matches!(cause, FailureCause::DeadlineExceeded { .. });
                    if !ignorable {
                        self.follow_up.after_failed(request).await;
                    }
                }
            }
            JobOutcome::Dropped { .. } | JobOutcome::Cancelled => {}
        }
    }
}
