// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Courier delivery pipeline.
//!
//! Two families live here. [`CourierError`] covers infrastructure failures
//! (storage, configuration, collaborator plumbing). [`SendError`] is the
//! closed taxonomy every failed send is mapped into before the queue decides
//! whether to retry, escalate, or drop.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DeviceId, ServiceId};

/// The infrastructure error type used across Courier crates.
#[derive(Debug, Error)]
pub enum CourierError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A collaborator transport failed outside the HTTP status taxonomy.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The protocol library rejected an operation.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Closed classification of a failed send.
///
/// Raw transport and protocol failures are mapped into exactly one of these
/// variants. Retry and ignorability decisions operate on this enum only.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SendError {
    /// The recipient's identity key changed since we last trusted it.
    #[error("untrusted identity for {service_id}")]
    UntrustedIdentity { service_id: ServiceId },

    /// The account no longer exists on the server.
    #[error("unregistered user {service_id}")]
    UnregisteredUser { service_id: ServiceId },

    /// HTTP 413/429. `retry_after` is the server-suggested wait, if any.
    #[error("rate limited (HTTP {code}), retry after {retry_after:?}")]
    RateLimited {
        code: u16,
        retry_after: Option<Duration>,
    },

    /// HTTP 428: the server wants the user to solve a challenge first.
    #[error("challenge required for {service_id}")]
    ChallengeRequired {
        service_id: ServiceId,
        retry_after: Option<Duration>,
        token: Option<String>,
    },

    /// A prekey bundle arrived without a required key.
    #[error("malformed prekey bundle for {service_id}.{device_id}: missing {missing}")]
    MalformedBundle {
        service_id: ServiceId,
        device_id: DeviceId,
        missing: String,
    },

    /// Any other HTTP status or a connection-level failure (`code` is `None`).
    #[error("network or server error ({code:?}): {message}")]
    NetworkOrServer { code: Option<u16>, message: String },

    /// Anything else. Surfaced to the caller and never retried.
    #[error("fatal send error: {0}")]
    Fatal(String),
}

/// HTTP status the server uses to tell clients to stop retrying.
pub const SERVER_ASKED_TO_STOP: u16 = 508;

impl SendError {
    /// Build the error for an HTTP status returned while talking to `service_id`.
    ///
    /// Credential fallthrough happens before classification, so a 401/403
    /// reaching this point was rejected on the last tier and is fatal.
    pub fn from_http(service_id: &ServiceId, code: u16, retry_after: Option<Duration>) -> Self {
        match code {
            401 | 403 => SendError::Fatal(format!(
                "HTTP {code}: every credential was rejected for {service_id}"
            )),
            404 => SendError::UnregisteredUser {
                service_id: service_id.clone(),
            },
            413 | 429 => SendError::RateLimited { code, retry_after },
            428 => SendError::ChallengeRequired {
                service_id: service_id.clone(),
                retry_after,
                token: None,
            },
            _ => SendError::NetworkOrServer {
                code: Some(code),
                message: format!("HTTP {code}"),
            },
        }
    }

    /// Server-provided wait before the next attempt, if the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SendError::RateLimited { retry_after, .. }
            | SendError::ChallengeRequired { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the pipeline may try again on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            SendError::RateLimited { .. } => true,
            SendError::NetworkOrServer { code, .. } => *code != Some(SERVER_ASKED_TO_STOP),
            _ => false,
        }
    }

    /// Short, stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SendError::UntrustedIdentity { .. } => "untrusted_identity",
            SendError::UnregisteredUser { .. } => "unregistered_user",
            SendError::RateLimited { .. } => "rate_limited",
            SendError::ChallengeRequired { .. } => "challenge_required",
            SendError::MalformedBundle { .. } => "malformed_bundle",
            SendError::NetworkOrServer { .. } => "network_or_server",
            SendError::Fatal(_) => "fatal",
        }
    }
}

/// One recipient's failure inside a multi-recipient send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientError {
    pub service_id: ServiceId,
    pub error: SendError,
}

impl RecipientError {
    pub fn new(service_id: ServiceId, error: SendError) -> Self {
        Self { service_id, error }
    }
}

impl std::fmt::Display for RecipientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.service_id, self.error)
    }
}

/// Failure reported by the protocol library for one address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The stored identity key does not match the one presented.
    #[error("untrusted identity key")]
    UntrustedIdentity,

    /// No established session exists for the address.
    #[error("no session for address")]
    NoSession,

    /// Anything else the library reports.
    #[error("{0}")]
    Other(String),
}

/// Failure returned by the directory or transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server answered with a non-success HTTP status.
    #[error("HTTP {code}")]
    Http {
        code: u16,
        retry_after: Option<Duration>,
        mismatch: Option<crate::types::DeviceMismatch>,
    },

    /// The request never produced a status (connection reset, timeout, DNS).
    #[error("network failure: {0}")]
    Network(String),
}

impl TransportError {
    /// Shorthand for an HTTP failure without headers or body.
    pub fn status(code: u16) -> Self {
        TransportError::Http {
            code,
            retry_after: None,
            mismatch: None,
        }
    }

    /// The HTTP status, if the server produced one.
    pub fn code(&self) -> Option<u16> {
        match self {
            TransportError::Http { code, .. } => Some(*code),
            TransportError::Network(_) => None,
        }
    }

    /// True for the statuses that mean the presented credential was rejected.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self.code(), Some(401) | Some(403))
    }

    /// Classify this failure for `service_id` into the send taxonomy.
    pub fn classify(&self, service_id: &ServiceId) -> SendError {
        match self {
            TransportError::Http {
                code, retry_after, ..
            } => SendError::from_http(service_id, *code, *retry_after),
            TransportError::Network(message) => SendError::NetworkOrServer {
                code: None,
                message: message.clone(),
            },
        }
    }
}
