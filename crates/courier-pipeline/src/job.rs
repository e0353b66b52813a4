// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Send jobs: one logical message (or control message) for one destination.
//!
//! A job is created by the caller, then owned and mutated only by its
//! destination's queue worker (attempt counter, recipient narrowing).

use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::types::ReceiptType;
use courier_core::{ContentHint, CourierError, DestinationId, DeviceId, ServiceId};
use serde::Serialize;
use tokio::time::Instant;

/// Kind of a send job, without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    UserMessage,
    ExpirationTimerUpdate,
    ProfileKeyUpdate,
    ResendRequest,
    ReceiptBatch(ReceiptType),
    NullMessage,
    SavedPayload,
}

impl JobKind {
    /// Whether a failure of this job is something the user sees in the timeline.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, JobKind::UserMessage | JobKind::ExpirationTimerUpdate)
    }

    /// Whether a challenge hit by this job should be shown to the user.
    pub fn shows_captcha(&self) -> bool {
        self.is_user_visible()
    }

    /// Jobs that are silently dropped when a recipient's identity is untrusted.
    pub fn cancels_on_untrusted(&self) -> bool {
        matches!(self, JobKind::ProfileKeyUpdate | JobKind::ReceiptBatch(_))
    }

    /// Control messages go out even before the conversation is accepted.
    pub fn requires_accepted(&self) -> bool {
        !matches!(
            self,
            JobKind::ResendRequest | JobKind::NullMessage | JobKind::SavedPayload
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobKind::UserMessage => "user_message",
            JobKind::ExpirationTimerUpdate => "expiration_timer_update",
            JobKind::ProfileKeyUpdate => "profile_key_update",
            JobKind::ResendRequest => "resend_request",
            JobKind::ReceiptBatch(_) => "receipt_batch",
            JobKind::NullMessage => "null_message",
            JobKind::SavedPayload => "saved_payload",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::ReceiptBatch(t) => write!(f, "receipt_batch({t})"),
            other => f.write_str(other.label()),
        }
    }
}

/// A plaintext resend request for one message we failed to decrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResendRequest {
    /// Account whose message we could not decrypt.
    pub sender_id: ServiceId,
    /// Device the undecryptable message came from; the request goes only there.
    pub sender_device: DeviceId,
    /// Timestamp of the undecryptable message.
    pub original_timestamp: u64,
    /// Content hint of the undecryptable envelope; decides the follow-up.
    pub content_hint: ContentHint,
    /// Conversation the undecryptable message belongs to (direct or group).
    pub conversation_id: DestinationId,
    pub received_at: DateTime<Utc>,
    /// Serialized decryption-error control message.
    pub plaintext: Vec<u8>,
}

/// Kind-specific immutable job data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    UserMessage {
        body: String,
        content_hint: ContentHint,
    },
    ExpirationTimerUpdate {
        expire_timer_secs: u32,
    },
    ProfileKeyUpdate {
        profile_key: Vec<u8>,
    },
    ResendRequest(ResendRequest),
    ReceiptBatch {
        receipt_type: ReceiptType,
        timestamps: Vec<u64>,
    },
    NullMessage,
    SavedPayload {
        body: Vec<u8>,
        content_hint: ContentHint,
    },
}

/// Content body handed to the protocol store for encryption.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Content<'a> {
    DataMessage {
        body: &'a str,
        timestamp: u64,
    },
    ExpirationTimerUpdate {
        expire_timer_secs: u32,
        timestamp: u64,
    },
    ProfileKey {
        profile_key: &'a [u8],
        timestamp: u64,
    },
    Receipt {
        receipt_type: String,
        timestamps: &'a [u64],
    },
    NullMessage {
        padding: Vec<u8>,
    },
}

const NULL_MESSAGE_PADDING: usize = 140;

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::UserMessage { .. } => JobKind::UserMessage,
            JobPayload::ExpirationTimerUpdate { .. } => JobKind::ExpirationTimerUpdate,
            JobPayload::ProfileKeyUpdate { .. } => JobKind::ProfileKeyUpdate,
            JobPayload::ResendRequest(_) => JobKind::ResendRequest,
            JobPayload::ReceiptBatch { receipt_type, .. } => JobKind::ReceiptBatch(*receipt_type),
            JobPayload::NullMessage => JobKind::NullMessage,
            JobPayload::SavedPayload { .. } => JobKind::SavedPayload,
        }
    }

    pub fn content_hint(&self) -> ContentHint {
        match self {
            JobPayload::UserMessage { content_hint, .. }
            | JobPayload::SavedPayload { content_hint, .. } => *content_hint,
            JobPayload::ResendRequest(_) | JobPayload::NullMessage => ContentHint::Implicit,
            _ => ContentHint::Default,
        }
    }

    /// Serialize the content that gets encrypted for each device.
    ///
    /// Resend requests and saved payloads carry pre-built bytes.
    pub fn encode(&self, timestamp: u64) -> Result<Vec<u8>, CourierError> {
        let content = match self {
            JobPayload::ResendRequest(request) => return Ok(request.plaintext.clone()),
            JobPayload::SavedPayload { body, .. } => return Ok(body.clone()),
            JobPayload::UserMessage { body, .. } => Content::DataMessage { body, timestamp },
            JobPayload::ExpirationTimerUpdate { expire_timer_secs } => {
                Content::ExpirationTimerUpdate {
                    expire_timer_secs: *expire_timer_secs,
                    timestamp,
                }
            }
            JobPayload::ProfileKeyUpdate { profile_key } => Content::ProfileKey {
                profile_key,
                timestamp,
            },
            JobPayload::ReceiptBatch {
                receipt_type,
                timestamps,
            } => Content::Receipt {
                receipt_type: receipt_type.to_string(),
                timestamps,
            },
            JobPayload::NullMessage => Content::NullMessage {
                padding: vec![0; NULL_MESSAGE_PADDING],
            },
        };
        serde_json::to_vec(&content).map_err(|e| CourierError::Internal(e.to_string()))
    }
}

/// One attempt-tracked delivery of one payload to one destination.
#[derive(Debug, Clone)]
pub struct SendJob {
    pub destination_id: DestinationId,
    pub payload: JobPayload,
    /// Logical send time. Preserved across retries, never re-stamped.
    pub timestamp: u64,
    /// Attempts made so far. Zero until the first attempt starts.
    pub attempt: u32,
    /// The job stops retrying once this instant has passed.
    pub deadline: Instant,
    /// Set after a partial group failure: only these recipients are retried.
    pub recipient_filter: Option<Vec<ServiceId>>,
}

impl SendJob {
    pub fn new(
        destination_id: DestinationId,
        payload: JobPayload,
        timestamp: u64,
        deadline: Instant,
    ) -> Self {
        Self {
            destination_id,
            payload,
            timestamp,
            attempt: 0,
            deadline,
            recipient_filter: None,
        }
    }

    /// Job whose deadline is `budget` from now.
    pub fn with_budget(
        destination_id: DestinationId,
        payload: JobPayload,
        timestamp: u64,
        budget: Duration,
    ) -> Self {
        Self::new(destination_id, payload, timestamp, Instant::now() + budget)
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn time_remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    pub fn is_final_attempt(&self, max_attempts: u32) -> bool {
        self.attempt >= max_attempts
    }

    /// Whether `service_id` is still a target of this job.
    pub fn targets(&self, service_id: &ServiceId) -> bool {
        self.recipient_filter
            .as_ref()
            .is_none_or(|filter| filter.contains(service_id))
    }
}
