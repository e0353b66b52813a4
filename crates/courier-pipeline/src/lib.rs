// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outgoing-message delivery pipeline.
//!
//! Jobs are enqueued per destination on a [`SendQueueManager`]. Each job
//! attempt goes through [`MessageSender`], which fetches prekey bundles,
//! establishes sessions, encrypts and hands envelopes to the transport.
//! Failures are classified and either retried with backoff, parked on a
//! challenge, or finalized and reported to the [`DeliverySink`].
//! Decryption-error events enter through [`ResendCoordinator`].

pub mod classify;
pub mod executor;
pub mod job;
pub mod key_fetch;
pub mod queue;
pub mod rate_limit;
pub mod recording;
pub mod resend;
pub mod retry;
pub mod sender;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use courier_config::CourierConfig;
use courier_core::{
    ConversationStore, DeliverySink, DirectoryService, LocalIdentity, ProtocolStore, Transport,
};
use courier_storage::{Database, GroupSendTokenCache, RetryPlaceholderStore};
use tracing::info;

pub use executor::{Attempt, AttemptInfo, Continuation, JobExecutor, PipelineExecutor};
pub use job::{JobKind, JobPayload, ResendRequest, SendJob};
pub use key_fetch::KeyBundleFetcher;
pub use queue::{FailureCause, JobHandle, JobOutcome, QueueSettings, QueueState, SendQueueManager};
pub use rate_limit::RequestTracker;
pub use resend::{
    DecryptionErrorAction, DecryptionErrorEvent, ResendCoordinator, ResendSettings,
    RetryRequestAction, RetryRequestEvent,
};
pub use retry::{RetryDecision, RetryScheduler};
pub use sender::{MessageSender, OutgoingMessage};
pub use session::{SessionJobQueue, SessionNegotiator};

/// External services the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn DirectoryService>,
    pub transport: Arc<dyn Transport>,
    pub protocol: Arc<dyn ProtocolStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub sink: Arc<dyn DeliverySink>,
}

/// A fully wired pipeline.
pub struct Pipeline {
    pub queue: SendQueueManager,
    pub resend: Arc<ResendCoordinator>,
    pub tokens: GroupSendTokenCache,
    pub placeholders: RetryPlaceholderStore,
}

impl Pipeline {
    /// Wire every component from configuration. Queue workers spawn on the
    /// current Tokio runtime when a destination is first used.
    pub fn new(
        config: &CourierConfig,
        our: LocalIdentity,
        collaborators: Collaborators,
        db: Database,
    ) -> Self {
        let Collaborators {
            directory,
            transport,
            protocol,
            conversations,
            sink,
        } = collaborators;
        recording::register_metrics();

        let tokens = GroupSendTokenCache::new(db.clone());
        let placeholders = RetryPlaceholderStore::new(
            db,
            Duration::from_secs(config.resend.placeholder_ttl_secs),
        );
        let session_jobs = Arc::new(SessionJobQueue::new());
        let fetcher = KeyBundleFetcher::new(our.clone(), directory, protocol.clone());
        let sender = Arc::new(MessageSender::new(
            our.clone(),
            transport,
            protocol.clone(),
            conversations.clone(),
            tokens.clone(),
            fetcher,
            session_jobs,
            config.queue.max_device_reconciliations,
        ));

        let tracker = Arc::new(RequestTracker::new(Duration::from_secs(
            config.resend.session_reset_cooldown_secs,
        )));
        let resetter = Arc::new(resend::SessionResetter::new(
            our.clone(),
            protocol.clone(),
            conversations.clone(),
            sink.clone(),
            tracker,
        ));
        let follow_up = Arc::new(resend::ResendFollowUp::new(
            placeholders.clone(),
            sink.clone(),
            resetter.clone(),
        ));
        let executor = Arc::new(PipelineExecutor::new(
            our.clone(),
            conversations.clone(),
            sink.clone(),
            sender,
            follow_up,
        ));

        let settings = QueueSettings::from_config(&config.queue);
        info!(
            max_retry_time_secs = settings.max_retry_time.as_secs(),
            max_attempts = settings.max_attempts,
            "send pipeline ready"
        );
        let queue = SendQueueManager::new(
            executor,
            RetryScheduler::from_config(&config.retry),
            settings,
        );
        let resend = Arc::new(ResendCoordinator::new(
            our,
            queue.clone(),
            protocol,
            conversations,
            sink,
            resetter,
            placeholders.clone(),
            ResendSettings::from_config(&config.resend),
        ));

        Self {
            queue,
            resend,
            tokens,
            placeholders,
        }
    }

    /// Cancel all queued and running jobs.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}
