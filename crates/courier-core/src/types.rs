// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the collaborator traits and the delivery pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{RecipientError, SendError};

/// Stable account identifier of a person (one per account, many devices).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(pub String);

/// Identifier of a direct contact or a group; owns one send queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationId(pub String);

/// Identifier of a group, as used by the group-send token cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

/// Numeric device identifier within one account.
pub type DeviceId = u32;

macro_rules! impl_id_display {
    ($($ty:ty),*) => {
        $(
            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $ty {
                fn from(value: &str) -> Self {
                    Self(value.to_string())
                }
            }
        )*
    };
}

impl_id_display!(ServiceId, DestinationId, GroupId);

/// One device of one account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub service_id: ServiceId,
    pub device_id: DeviceId,
}

impl Address {
    pub fn new(service_id: ServiceId, device_id: DeviceId) -> Self {
        Self {
            service_id,
            device_id,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.service_id, self.device_id)
    }
}

/// An [`Address`] scoped to one of our own identities.
///
/// Session state is keyed by this triple (our identity, peer, peer device).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedAddress {
    pub our_id: ServiceId,
    pub address: Address,
}

impl QualifiedAddress {
    pub fn new(our_id: ServiceId, address: Address) -> Self {
        Self { our_id, address }
    }
}

impl std::fmt::Display for QualifiedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.our_id, self.address)
    }
}

/// Our own account and device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub service_id: ServiceId,
    pub device_id: DeviceId,
}

/// Cryptographic session state for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum SessionState {
    Absent,
    Established,
    /// The peer's identity key changed since the last trust decision.
    Untrusted,
}

/// Envelope metadata describing whether the plaintext can be resent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
pub enum ContentHint {
    /// The sender shows a delivery-issue marker if decryption fails.
    #[default]
    Default,
    /// The sender will resend; the receiver waits for the retried message.
    Resendable,
    /// Ephemeral content. Nothing is shown if it is lost.
    Implicit,
}

/// Type of a batched receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum ReceiptType {
    Delivery,
    Read,
    Viewed,
}

/// Unidentified-sender access key for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey(pub Vec<u8>);

/// Authorization presented to the directory or transport.
///
/// Ordered by preference: access key, then group-send token, then a fully
/// authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    AccessKey(AccessKey),
    GroupSendToken(Vec<u8>),
    Authenticated,
}

impl Credential {
    /// Label used in logs.
    pub fn tier(&self) -> &'static str {
        match self {
            Credential::AccessKey(_) => "access_key",
            Credential::GroupSendToken(_) => "group_send_token",
            Credential::Authenticated => "authenticated",
        }
    }

    /// True when the request is sealed (does not reveal the sender).
    pub fn is_sealed(&self) -> bool {
        !matches!(self, Credential::Authenticated)
    }
}

/// One-time prekey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKey {
    pub key_id: u32,
    pub public_key: Vec<u8>,
}

/// Signed prekey, or a post-quantum (Kyber) prekey which has the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPreKey {
    pub key_id: u32,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Device entry as it arrives from the directory, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDeviceBundle {
    pub device_id: DeviceId,
    pub registration_id: u32,
    #[serde(default)]
    pub pre_key: Option<PreKey>,
    #[serde(default)]
    pub signed_pre_key: Option<SignedPreKey>,
    #[serde(default)]
    pub pq_pre_key: Option<SignedPreKey>,
}

/// Prekey bundle response as it arrives from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPrekeyBundle {
    pub identity_key: Vec<u8>,
    #[serde(default)]
    pub devices: Vec<RawDeviceBundle>,
}

/// A device bundle that carries every key needed to start a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBundle {
    pub device_id: DeviceId,
    pub registration_id: u32,
    pub identity_key: Vec<u8>,
    pub pre_key: Option<PreKey>,
    pub signed_pre_key: SignedPreKey,
    pub pq_pre_key: SignedPreKey,
}

/// Validated bundles for some or all devices of one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrekeyBundleSet {
    pub service_id: ServiceId,
    pub devices: Vec<DeviceBundle>,
}

impl PrekeyBundleSet {
    /// Validate a raw directory response.
    ///
    /// Any device missing its signed prekey or its post-quantum prekey fails
    /// the whole set with [`SendError::MalformedBundle`].
    pub fn validate(service_id: &ServiceId, raw: RawPrekeyBundle) -> Result<Self, SendError> {
        let identity_key = raw.identity_key;
        let devices = raw
            .devices
            .into_iter()
            .map(|device| {
                let malformed = |missing: &str| SendError::MalformedBundle {
                    service_id: service_id.clone(),
                    device_id: device.device_id,
                    missing: missing.to_string(),
                };
                let signed_pre_key = device
                    .signed_pre_key
                    .ok_or_else(|| malformed("signed prekey"))?;
                let pq_pre_key = device
                    .pq_pre_key
                    .ok_or_else(|| malformed("post-quantum prekey"))?;
                Ok(DeviceBundle {
                    device_id: device.device_id,
                    registration_id: device.registration_id,
                    identity_key: identity_key.clone(),
                    pre_key: device.pre_key,
                    signed_pre_key,
                    pq_pre_key,
                })
            })
            .collect::<Result<Vec<_>, SendError>>()?;

        Ok(Self {
            service_id: service_id.clone(),
            devices,
        })
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|d| d.device_id).collect()
    }
}

/// How an envelope body was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// Normal ratchet message.
    Ciphertext,
    /// First message after a prekey-based session setup.
    PrekeyCiphertext,
    /// Unencrypted content, used only for decryption-error control messages.
    Plaintext,
}

/// One per-device payload handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub device_id: DeviceId,
    pub kind: EnvelopeKind,
    pub content: Vec<u8>,
}

/// Device list corrections returned with HTTP 409 and 410.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMismatch {
    #[serde(default)]
    pub missing_devices: Vec<DeviceId>,
    #[serde(default)]
    pub extra_devices: Vec<DeviceId>,
    #[serde(default)]
    pub stale_devices: Vec<DeviceId>,
}

/// Server acknowledgement of a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeliveryReceipt {
    /// True when the message went out sealed.
    pub unidentified: bool,
}

/// What kind of conversation a destination is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationKind {
    Direct { service_id: ServiceId },
    Group { group_id: GroupId, members: Vec<ServiceId> },
}

/// The slice of conversation state the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: DestinationId,
    pub kind: ConversationKind,
    pub is_blocked: bool,
    pub is_unregistered: bool,
    pub is_accepted: bool,
}

impl Conversation {
    /// A direct conversation that is accepted and not blocked.
    pub fn direct(id: impl Into<String>, service_id: ServiceId) -> Self {
        Self {
            id: DestinationId(id.into()),
            kind: ConversationKind::Direct { service_id },
            is_blocked: false,
            is_unregistered: false,
            is_accepted: true,
        }
    }

    /// A group conversation that is accepted and not blocked.
    pub fn group(id: impl Into<String>, group_id: GroupId, members: Vec<ServiceId>) -> Self {
        Self {
            id: DestinationId(id.into()),
            kind: ConversationKind::Group { group_id, members },
            is_blocked: false,
            is_unregistered: false,
            is_accepted: true,
        }
    }

    pub fn destination_kind(&self) -> DestinationKind {
        match self.kind {
            ConversationKind::Direct { .. } => DestinationKind::Direct,
            ConversationKind::Group { .. } => DestinationKind::Group,
        }
    }
}

/// Direct or group, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum DestinationKind {
    Direct,
    Group,
}

/// A previously sent content body, kept so it can be resent on request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPayload {
    pub content_hint: ContentHint,
    pub body: Vec<u8>,
    pub timestamp: u64,
}

/// Result of one send attempt, consumed synchronously by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    Retryable {
        error: SendError,
        suggested_delay: Option<Duration>,
    },
    PartialFailure(Vec<RecipientError>),
    Fatal(SendError),
}

impl SendOutcome {
    /// Retryable outcome carrying the error's own retry-after hint.
    pub fn retryable(error: SendError) -> Self {
        let suggested_delay = error.retry_after();
        SendOutcome::Retryable {
            error,
            suggested_delay,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success)
    }
}
