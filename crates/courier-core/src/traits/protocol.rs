// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol library and session store trait.
//!
//! The ratchet and X3DH primitives are a black box. This trait exposes only
//! the operations the send path needs. Implementations are not required to
//! serialize mutations themselves: the pipeline routes every mutation for an
//! address through its per-address session job queue.

use async_trait::async_trait;

use crate::error::{CourierError, ProtocolError};
use crate::types::{DeviceBundle, DeviceId, Envelope, QualifiedAddress, ServiceId, SessionState};

#[async_trait]
pub trait ProtocolStore: Send + Sync + 'static {
    /// Devices of `service_id` that currently have an open session.
    async fn device_ids(
        &self,
        our_id: &ServiceId,
        service_id: &ServiceId,
    ) -> Result<Vec<DeviceId>, CourierError>;

    async fn session_state(&self, address: &QualifiedAddress) -> Result<SessionState, CourierError>;

    /// Start a session from a validated bundle.
    async fn process_prekey_bundle(
        &self,
        address: &QualifiedAddress,
        bundle: &DeviceBundle,
    ) -> Result<(), ProtocolError>;

    /// Encrypt `plaintext` for one device using its session.
    async fn encrypt(
        &self,
        address: &QualifiedAddress,
        plaintext: &[u8],
    ) -> Result<Envelope, ProtocolError>;

    async fn archive_session(&self, address: &QualifiedAddress) -> Result<(), CourierError>;

    async fn archive_all_sessions(
        &self,
        our_id: &ServiceId,
        service_id: &ServiceId,
    ) -> Result<(), CourierError>;

    /// Archive the session and mark it so the next message starts a new one.
    async fn light_session_reset(&self, address: &QualifiedAddress) -> Result<(), CourierError>;

    /// Whether our current session with `address` uses `ratchet_key`.
    async fn ratchet_key_matches(
        &self,
        address: &QualifiedAddress,
        ratchet_key: &[u8],
    ) -> Result<bool, CourierError>;

    /// Build the plaintext decryption-error control message for a failed envelope.
    fn decryption_error_message(
        &self,
        ciphertext: &[u8],
        ciphertext_type: u8,
        timestamp: u64,
        sender_device: DeviceId,
    ) -> Result<Vec<u8>, ProtocolError>;
}
