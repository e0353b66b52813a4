// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock protocol store.
//!
//! Tracks a session state per peer device and logs every archive and
//! reset. Encryption just tags the plaintext with the device id.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use courier_core::types::{DeviceBundle, Envelope, EnvelopeKind, SessionState};
use courier_core::{
    CourierError, DeviceId, ProtocolError, ProtocolStore, QualifiedAddress, ServiceId,
};

type DeviceKey = (ServiceId, DeviceId);

#[derive(Default)]
pub struct MockProtocolStore {
    sessions: Mutex<HashMap<DeviceKey, SessionState>>,
    changed_identities: Mutex<HashSet<ServiceId>>,
    ratchet_keys: Mutex<HashMap<DeviceKey, Vec<u8>>>,
    processed: Mutex<Vec<DeviceKey>>,
    archived: Mutex<Vec<DeviceKey>>,
    archived_all: Mutex<Vec<ServiceId>>,
    resets: Mutex<Vec<DeviceKey>>,
}

fn key(address: &QualifiedAddress) -> DeviceKey {
    (address.address.service_id.clone(), address.address.device_id)
}

impl MockProtocolStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_session(&self, peer: impl Into<ServiceId>, device: DeviceId, state: SessionState) {
        self.sessions.lock().await.insert((peer.into(), device), state);
    }

    /// Make bundle processing for `peer` fail as an identity change.
    pub async fn change_identity(&self, peer: impl Into<ServiceId>) {
        self.changed_identities.lock().await.insert(peer.into());
    }

    pub async fn set_ratchet_key(&self, peer: impl Into<ServiceId>, device: DeviceId, ratchet_key: Vec<u8>) {
        self.ratchet_keys
            .lock()
            .await
            .insert((peer.into(), device), ratchet_key);
    }

    pub async fn session(&self, peer: &ServiceId, device: DeviceId) -> SessionState {
        self.sessions
            .lock()
            .await
            .get(&(peer.clone(), device))
            .copied()
            .unwrap_or(SessionState::Absent)
    }

    /// Devices whose bundle was processed, in order.
    pub async fn processed(&self) -> Vec<DeviceKey> {
        self.processed.lock().await.clone()
    }

    pub async fn archived(&self) -> Vec<DeviceKey> {
        self.archived.lock().await.clone()
    }

    /// Peers whose sessions were all archived.
    pub async fn archived_all(&self) -> Vec<ServiceId> {
        self.archived_all.lock().await.clone()
    }

    pub async fn resets(&self) -> Vec<DeviceKey> {
        self.resets.lock().await.clone()
    }
}

#[async_trait]
impl ProtocolStore for MockProtocolStore {
    async fn device_ids(
        &self,
        _our_id: &ServiceId,
        service_id: &ServiceId,
    ) -> Result<Vec<DeviceId>, CourierError> {
        let mut devices: Vec<DeviceId> = self
            .sessions
            .lock()
            .await
            .iter()
            .filter(|((peer, _), state)| peer == service_id && **state != SessionState::Absent)
            .map(|((_, device), _)| *device)
            .collect();
        devices.sort_unstable();
        Ok(devices)
    }

    async fn session_state(&self, address: &QualifiedAddress) -> Result<SessionState, CourierError> {
        Ok(self
            .sessions
            .lock()
            .await
            .get(&key(address))
            .copied()
            .unwrap_or(SessionState::Absent))
    }

    async fn process_prekey_bundle(
        &self,
        address: &QualifiedAddress,
        _bundle: &DeviceBundle,
    ) -> Result<(), ProtocolError> {
        if self
            .changed_identities
            .lock()
            .await
            .contains(&address.address.service_id)
        {
            return Err(ProtocolError::UntrustedIdentity);
        }
        self.processed.lock().await.push(key(address));
        self.sessions
            .lock()
            .await
            .insert(key(address), SessionState::Established);
        Ok(())
    }

    async fn encrypt(
        &self,
        address: &QualifiedAddress,
        plaintext: &[u8],
    ) -> Result<Envelope, ProtocolError> {
        match self.sessions.lock().await.get(&key(address)) {
            Some(SessionState::Established) => Ok(Envelope {
                device_id: address.address.device_id,
                kind: EnvelopeKind::Ciphertext,
                content: plaintext.to_vec(),
            }),
            Some(SessionState::Untrusted) => Err(ProtocolError::UntrustedIdentity),
            _ => Err(ProtocolError::NoSession),
        }
    }

    async fn archive_session(&self, address: &QualifiedAddress) -> Result<(), CourierError> {
        self.sessions.lock().await.remove(&key(address));
        self.archived.lock().await.push(key(address));
        Ok(())
    }

    async fn archive_all_sessions(
        &self,
        _our_id: &ServiceId,
        service_id: &ServiceId,
    ) -> Result<(), CourierError> {
        self.sessions
            .lock()
            .await
            .retain(|(peer, _), _| peer != service_id);
        self.archived_all.lock().await.push(service_id.clone());
        Ok(())
    }

    async fn light_session_reset(&self, address: &QualifiedAddress) -> Result<(), CourierError> {
        self.sessions.lock().await.remove(&key(address));
        self.resets.lock().await.push(key(address));
        Ok(())
    }

    async fn ratchet_key_matches(
        &self,
        address: &QualifiedAddress,
        ratchet_key: &[u8],
    ) -> Result<bool, CourierError> {
        Ok(self
            .ratchet_keys
            .lock()
            .await
            .get(&key(address))
            .is_some_and(|current| current.as_slice() == ratchet_key))
    }

    fn decryption_error_message(
        &self,
        ciphertext: &[u8],
        ciphertext_type: u8,
        timestamp: u64,
        sender_device: DeviceId,
    ) -> Result<Vec<u8>, ProtocolError> {
        if ciphertext.is_empty() {
            return Err(ProtocolError::Other("empty ciphertext".into()));
        }
        Ok(format!("decryption-error:{ciphertext_type}:{timestamp}:{sender_device}").into_bytes())
    }
}
