// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decryption-error recovery.
//!
//! When we fail to decrypt a peer's message we ask the sending device for a
//! resend with a plaintext control message. When that is impossible, or the
//! request itself fails for good, we reset our session with the peer instead.
//! The reverse direction (a peer asking us to resend) is handled by
//! [`ResendCoordinator::on_retry_request`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_config::model::ResendConfig;
use courier_core::{
    Address, ContentHint, ConversationKind, ConversationStore, CourierError, DeliverySink,
    DestinationId, DeviceId, LocalIdentity, ProtocolStore, QualifiedAddress, ServiceId,
};
use courier_storage::{RetryPlaceholder, RetryPlaceholderStore};
use dashmap::{DashMap, DashSet};
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::job::{JobPayload, ResendRequest};
use crate::queue::{JobHandle, SendQueueManager};
use crate::rate_limit::RequestTracker;
use crate::recording;

const JITTER_STEP: Duration = Duration::from_millis(200);
const MAX_JITTER_STEPS: u32 = 5;

fn retry_key(sender: &ServiceId, device: DeviceId, timestamp: u64) -> String {
    format!("{sender}.{device}:{timestamp}")
}

/// Attempts seen for one retry key, counted from `first_seen`.
#[derive(Debug, Clone, Copy)]
struct RetryRecord {
    count: u32,
    first_seen: Instant,
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Light session reset, throttled per address.
pub struct SessionResetter {
    our: LocalIdentity,
    protocol: Arc<dyn ProtocolStore>,
    conversations: Arc<dyn ConversationStore>,
    sink: Arc<dyn DeliverySink>,
    tracker: Arc<RequestTracker>,
}

impl SessionResetter {
    pub fn new(
        our: LocalIdentity,
        protocol: Arc<dyn ProtocolStore>,
        conversations: Arc<dyn ConversationStore>,
        sink: Arc<dyn DeliverySink>,
        tracker: Arc<RequestTracker>,
    ) -> Self {
        Self {
            our,
            protocol,
            conversations,
            sink,
            tracker,
        }
    }

    /// Reset our session with `sender.device`. Returns false when throttled.
    pub async fn reset(&self, sender: &ServiceId, device: DeviceId) -> Result<bool, CourierError> {
        let key = format!("{sender}.{device}");
        if !self.tracker.try_acquire(&key) {
            info!(peer = %key, "session reset throttled");
            return Ok(false);
        }

        let address = QualifiedAddress::new(
            self.our.service_id.clone(),
            Address::new(sender.clone(), device),
        );
        self.protocol.light_session_reset(&address).await?;
        recording::record_session_reset();
        info!(%address, "session reset after decryption error");

        match self.conversations.find_direct(sender).await? {
            Some(conversation) => {
                self.sink
                    .report_session_refreshed(&conversation.id, sender)
                    .await
            }
            None => debug!(peer = %sender, "no direct conversation to note the reset in"),
        }
        Ok(true)
    }
}

/// What followed a delivered resend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// A placeholder waits for the retried message.
    Placeholder,
    /// Implicit content; nothing to show.
    Nothing,
    /// A delivery-issue marker was reported.
    DeliveryIssue,
}

/// Actions taken once a resend-request job finishes.
pub struct ResendFollowUp {
    placeholders: RetryPlaceholderStore,
    sink: Arc<dyn DeliverySink>,
    resetter: Arc<SessionResetter>,
}

impl ResendFollowUp {
    pub fn new(
        placeholders: RetryPlaceholderStore,
        sink: Arc<dyn DeliverySink>,
        resetter: Arc<SessionResetter>,
    ) -> Self {
        Self {
            placeholders,
            sink,
            resetter,
        }
    }

    /// Exactly one follow-up per delivered request, chosen by content hint.
    pub async fn after_sent(&self, destination: &DestinationId, request: &ResendRequest) -> FollowUp {
        match request.content_hint {
            ContentHint::Resendable => {
                match self
                    .placeholders
                    .add(
                        &request.sender_id,
                        request.original_timestamp,
                        &request.conversation_id,
                        request.received_at,
                    )
                    .await
                {
                    Ok(_) => debug!(
                        destination = %destination,
                        sender = %request.sender_id,
                        sent_at = request.original_timestamp,
                        "waiting for resent message"
                    ),
                    Err(e) => warn!(sender = %request.sender_id, error = %e, "failed to store placeholder"),
                }
                FollowUp::Placeholder
            }
            ContentHint::Implicit => FollowUp::Nothing,
            ContentHint::Default => {
                self.sink
                    .report_delivery_issue(
                        &request.conversation_id,
                        &request.sender_id,
                        request.original_timestamp,
                    )
                    .await;
                FollowUp::DeliveryIssue
            }
        }
    }

    /// The request failed for good; fall back to a session reset.
    pub async fn after_failed(&self, request: &ResendRequest) {
        info!(sender = %request.sender_id, device = request.sender_device, "resend request failed; resetting session");
        if let Err(e) = self
            .resetter
            .reset(&request.sender_id, request.sender_device)
            .await
        {
            warn!(sender = %request.sender_id, error = %e, "session reset failed");
        }
    }
}

/// `[resend]` settings in runtime form.
#[derive(Debug, Clone)]
pub struct ResendSettings {
    pub retry_limit: u32,
    pub respond_max_age: Duration,
    pub decryption_error_delay: Duration,
}

impl ResendSettings {
    pub fn from_config(config: &ResendConfig) -> Self {
        Self {
            retry_limit: config.retry_limit,
            respond_max_age: Duration::from_secs(config.respond_max_age_secs),
            decryption_error_delay: Duration::from_millis(config.decryption_error_delay_ms),
        }
    }
}

impl Default for ResendSettings {
    fn default() -> Self {
        Self::from_config(&ResendConfig::default())
    }
}

/// We failed to decrypt a message.
#[derive(Debug, Clone)]
pub struct DecryptionErrorEvent {
    pub sender_id: ServiceId,
    pub sender_device: DeviceId,
    /// Timestamp of the undecryptable message.
    pub timestamp: u64,
    pub content_hint: ContentHint,
    /// Conversation the message belongs to.
    pub conversation_id: DestinationId,
    /// Raw ciphertext, when the envelope kept it.
    pub ciphertext: Option<Vec<u8>>,
    pub ciphertext_type: u8,
    pub received_at: DateTime<Utc>,
}

/// A peer failed to decrypt a message we sent and asks for it again.
#[derive(Debug, Clone)]
pub struct RetryRequestEvent {
    pub requester_id: ServiceId,
    pub requester_device: DeviceId,
    /// Our device that sent the original message.
    pub sender_device: DeviceId,
    /// Timestamp of the original message.
    pub sent_at: u64,
    /// Ratchet key the requester saw, if it reported one.
    pub ratchet_key: Option<Vec<u8>>,
}

#[derive(Debug)]
pub enum DecryptionErrorAction {
    /// Already being handled.
    Duplicate,
    /// The message decrypted (or was resent) while we waited.
    Resolved,
    LimitReached,
    ResendRequested(JobHandle),
    SessionReset { performed: bool },
}

#[derive(Debug)]
pub enum RetryRequestAction {
    LimitReached,
    Resent(JobHandle),
    NullMessage(JobHandle),
    Ignored,
}

/// Entry point for inbound decryption-error and retry-request events.
pub struct ResendCoordinator {
    our: LocalIdentity,
    queue: SendQueueManager,
    protocol: Arc<dyn ProtocolStore>,
    conversations: Arc<dyn ConversationStore>,
    sink: Arc<dyn DeliverySink>,
    resetter: Arc<SessionResetter>,
    placeholders: RetryPlaceholderStore,
    retry_record: DashMap<String, RetryRecord>,
    registered: DashSet<String>,
    settings: ResendSettings,
}

impl ResendCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        our: LocalIdentity,
        queue: SendQueueManager,
        protocol: Arc<dyn ProtocolStore>,
        conversations: Arc<dyn ConversationStore>,
        sink: Arc<dyn DeliverySink>,
        resetter: Arc<SessionResetter>,
        placeholders: RetryPlaceholderStore,
        settings: ResendSettings,
    ) -> Self {
        Self {
            our,
            queue,
            protocol,
            conversations,
            sink,
            resetter,
            placeholders,
            retry_record: DashMap::new(),
            registered: DashSet::new(),
            settings,
        }
    }

    /// Ask the sender to resend a message we could not decrypt.
    ///
    /// Falls back to a session reset when the sender has no matching direct
    /// conversation, the ciphertext is gone, or the request cannot be queued.
    pub async fn on_decryption_error(
        &self,
        event: DecryptionErrorEvent,
    ) -> Result<DecryptionErrorAction, CourierError> {
        let key = retry_key(&event.sender_id, event.sender_device, event.timestamp);
        if !self.registered.insert(key.clone()) {
            debug!(key, "decryption error already being handled");
            return Ok(DecryptionErrorAction::Duplicate);
        }
        let result = self.handle_decryption_error(&key, &event).await;
        self.registered.remove(&key);
        result
    }

    async fn handle_decryption_error(
        &self,
        key: &str,
        event: &DecryptionErrorEvent,
    ) -> Result<DecryptionErrorAction, CourierError> {
        let delay = self.decryption_error_delay();
        debug!(key, delay_ms = delay.as_millis() as u64, "delaying decryption error handling");
        tokio::time::sleep(delay).await;

        if !self.registered.contains(key) {
            debug!(key, "decryption error resolved while waiting");
            return Ok(DecryptionErrorAction::Resolved);
        }
        if !self.within_retry_limit(key) {
            warn!(key, limit = self.settings.retry_limit, "retry limit reached for decryption error");
            return Ok(DecryptionErrorAction::LimitReached);
        }

        let destination = match self.conversations.find_direct(&event.sender_id).await? {
            Some(conversation) => match &conversation.kind {
                ConversationKind::Direct { service_id } if *service_id == event.sender_id => {
                    conversation.id
                }
                _ => {
                    warn!(sender = %event.sender_id, "sender identity does not match conversation");
                    return self.reset(event).await;
                }
            },
            None => {
                info!(sender = %event.sender_id, "no direct conversation with sender");
                return self.reset(event).await;
            }
        };

        let Some(ciphertext) = &event.ciphertext else {
            info!(sender = %event.sender_id, "ciphertext unavailable");
            return self.reset(event).await;
        };
        let plaintext = match self.protocol.decryption_error_message(
            ciphertext,
            event.ciphertext_type,
            event.timestamp,
            event.sender_device,
        ) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(sender = %event.sender_id, error = %e, "failed to build decryption error message");
                return self.reset(event).await;
            }
        };

        let request = ResendRequest {
            sender_id: event.sender_id.clone(),
            sender_device: event.sender_device,
            original_timestamp: event.timestamp,
            content_hint: event.content_hint,
            conversation_id: event.conversation_id.clone(),
            received_at: event.received_at,
            plaintext,
        };
        match self
            .queue
            .enqueue(destination, JobPayload::ResendRequest(request), now_millis())
        {
            Ok(handle) => {
                info!(
                    sender = %event.sender_id,
                    device = event.sender_device,
                    sent_at = event.timestamp,
                    hint = %event.content_hint,
                    "requested resend"
                );
                Ok(DecryptionErrorAction::ResendRequested(handle))
            }
            Err(e) => {
                warn!(sender = %event.sender_id, error = %e, "failed to queue resend request");
                self.reset(event).await
            }
        }
    }

    /// A message from `sender.device` at `timestamp` decrypted after all.
    pub async fn on_successful_decrypt(
        &self,
        sender: &ServiceId,
        device: DeviceId,
        timestamp: u64,
    ) -> Result<Option<RetryPlaceholder>, CourierError> {
        let key = retry_key(sender, device, timestamp);
        self.registered.remove(&key);
        self.retry_record.remove(&key);
        let placeholder = self.placeholders.take(sender, timestamp).await?;
        if placeholder.is_some() {
            debug!(key, "resent message arrived");
        }
        Ok(placeholder)
    }

    /// Answer a peer's request to resend a message we sent.
    pub async fn on_retry_request(
        &self,
        event: RetryRequestEvent,
    ) -> Result<RetryRequestAction, CourierError> {
        let key = retry_key(&event.requester_id, event.requester_device, event.sent_at);
        if !self.within_retry_limit(&key) {
            warn!(key, limit = self.settings.retry_limit, "retry limit reached for retry request");
            return Ok(RetryRequestAction::LimitReached);
        }

        let address = QualifiedAddress::new(
            self.our.service_id.clone(),
            Address::new(event.requester_id.clone(), event.requester_device),
        );
        let mut archived = false;
        if let Some(ratchet_key) = &event.ratchet_key {
            if event.sender_device == self.our.device_id
                && self.protocol.ratchet_key_matches(&address, ratchet_key).await?
            {
                self.protocol.archive_session(&address).await?;
                info!(%address, "archived session named in retry request");
                archived = true;
            }
        }

        let Some(conversation) = self.conversations.find_direct(&event.requester_id).await? else {
            warn!(requester = %event.requester_id, "no direct conversation for retry request");
            return Ok(RetryRequestAction::Ignored);
        };

        let age = Duration::from_millis(now_millis().saturating_sub(event.sent_at));
        let sent = if age > self.settings.respond_max_age {
            info!(key, age_secs = age.as_secs(), "retry request too old to answer");
            None
        } else {
            self.conversations
                .find_sent(&event.requester_id, event.sent_at)
                .await?
        };

        match sent {
            Some(payload) => {
                let handle = self.queue.enqueue(
                    conversation.id,
                    JobPayload::SavedPayload {
                        body: payload.body,
                        content_hint: payload.content_hint,
                    },
                    payload.timestamp,
                )?;
                info!(key, "resending saved payload");
                Ok(RetryRequestAction::Resent(handle))
            }
            None if archived => {
                let handle =
                    self.queue
                        .enqueue(conversation.id, JobPayload::NullMessage, now_millis())?;
                info!(key, "sending null message after archive");
                Ok(RetryRequestAction::NullMessage(handle))
            }
            None => Ok(RetryRequestAction::Ignored),
        }
    }

    /// Drop expired placeholders, reporting a delivery issue for each.
    ///
    /// Also forgets retry records older than `respond_max_age`.
    pub async fn sweep_expired_placeholders(&self, now: DateTime<Utc>) -> Result<usize, CourierError> {
        let pruned = self.prune_retry_records(Instant::now());
        if pruned > 0 {
            debug!(pruned, "forgot stale retry records");
        }
        let expired = self.placeholders.take_expired(now).await?;
        for placeholder in &expired {
            self.sink
                .report_delivery_issue(
                    &placeholder.destination_id,
                    &placeholder.sender_id,
                    placeholder.sent_at,
                )
                .await;
        }
        Ok(expired.len())
    }

    async fn reset(&self, event: &DecryptionErrorEvent) -> Result<DecryptionErrorAction, CourierError> {
        let performed = self
            .resetter
            .reset(&event.sender_id, event.sender_device)
            .await?;
        Ok(DecryptionErrorAction::SessionReset { performed })
    }

    /// Retry keys currently counted against the limit.
    pub fn tracked_retries(&self) -> usize {
        self.retry_record.len()
    }

    fn prune_retry_records(&self, now: Instant) -> usize {
        let before = self.retry_record.len();
        let ttl = self.settings.respond_max_age;
        self.retry_record
            .retain(|_, record| now.duration_since(record.first_seen) < ttl);
        before.saturating_sub(self.retry_record.len())
    }

    fn within_retry_limit(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut record = self
            .retry_record
            .entry(key.to_string())
            .or_insert(RetryRecord {
                count: 0,
                first_seen: now,
            });
        if now.duration_since(record.first_seen) >= self.settings.respond_max_age {
            *record = RetryRecord {
                count: 0,
                first_seen: now,
            };
        }
        record.count += 1;
        record.count <= self.settings.retry_limit
    }

    fn decryption_error_delay(&self) -> Duration {
        let steps = rand::thread_rng().gen_range(0..=MAX_JITTER_STEPS);
        self.settings.decryption_error_delay + JITTER_STEP * steps
    }
}
