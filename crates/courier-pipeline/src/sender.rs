// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-recipient encryption and delivery.
//!
//! For each recipient the sender makes sure sessions exist, encrypts for
//! every device, and hands the envelopes to the transport. Device-list
//! corrections from the server (409/410) and rejected sealed credentials
//! (401/403) are handled here; everything else is classified and returned.

use std::sync::Arc;

use courier_core::types::{DeliveryReceipt, DeviceMismatch, Envelope, EnvelopeKind, SessionState};
use courier_core::{
    Address, ConversationStore, Credential, DeviceId, GroupId, LocalIdentity, ProtocolStore,
    QualifiedAddress, RecipientError, SendError, SendOutcome, ServiceId, Transport,
    TransportError,
};
use courier_storage::GroupSendTokenCache;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::classify::classify_protocol_error;
use crate::key_fetch::{credential_tiers, KeyBundleFetcher};
use crate::session::{SessionJobQueue, SessionNegotiator};

/// What to send to one recipient.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub content: Vec<u8>,
    pub timestamp: u64,
    /// Send unencrypted to this device only. Used for decryption-error requests.
    pub plaintext_device: Option<DeviceId>,
}

pub struct MessageSender {
    our: LocalIdentity,
    transport: Arc<dyn Transport>,
    protocol: Arc<dyn ProtocolStore>,
    conversations: Arc<dyn ConversationStore>,
    tokens: GroupSendTokenCache,
    fetcher: KeyBundleFetcher,
    negotiator: SessionNegotiator,
    session_jobs: Arc<SessionJobQueue>,
    max_device_reconciliations: u32,
}

impl MessageSender {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        our: LocalIdentity,
        transport: Arc<dyn Transport>,
        protocol: Arc<dyn ProtocolStore>,
        conversations: Arc<dyn ConversationStore>,
        tokens: GroupSendTokenCache,
        fetcher: KeyBundleFetcher,
        session_jobs: Arc<SessionJobQueue>,
        max_device_reconciliations: u32,
    ) -> Self {
        let negotiator = SessionNegotiator::new(our.clone(), protocol.clone(), session_jobs.clone());
        Self {
            our,
            transport,
            protocol,
            conversations,
            tokens,
            fetcher,
            negotiator,
            session_jobs,
            max_device_reconciliations,
        }
    }

    /// Send to one direct recipient.
    pub async fn send_direct(&self, recipient: &ServiceId, message: &OutgoingMessage) -> SendOutcome {
        match self.send_to_recipient(recipient, None, message).await {
            Ok(_) => SendOutcome::Success,
            Err(error) if error.is_retryable() => SendOutcome::retryable(error),
            Err(error) => SendOutcome::Fatal(error),
        }
    }

    /// Send to every group recipient concurrently and collect per-recipient errors.
    pub async fn send_group(
        &self,
        group_id: &GroupId,
        recipients: &[ServiceId],
        message: &OutgoingMessage,
    ) -> SendOutcome {
        let sends = recipients
            .iter()
            .map(|recipient| self.send_to_recipient(recipient, Some(group_id), message));
        let errors: Vec<RecipientError> = join_all(sends)
            .await
            .into_iter()
            .zip(recipients)
            .filter_map(|(result, recipient)| {
                result
                    .err()
                    .map(|error| RecipientError::new(recipient.clone(), error))
            })
            .collect();

        if errors.is_empty() {
            SendOutcome::Success
        } else {
            debug!(group = %group_id, failed = errors.len(), "group send had failures");
            SendOutcome::PartialFailure(errors)
        }
    }

    /// Deliver to every device of `recipient`.
    ///
    /// An untrusted identity archives every session with the recipient before
    /// the error is returned.
    pub async fn send_to_recipient(
        &self,
        recipient: &ServiceId,
        group: Option<&GroupId>,
        message: &OutgoingMessage,
    ) -> Result<DeliveryReceipt, SendError> {
        let result = self.deliver(recipient, group, message).await;
        if let Err(SendError::UntrustedIdentity { .. }) = &result {
            self.archive_untrusted(recipient).await;
        }
        result
    }

    /// Reconciles the device list as the server asks and falls through
    /// credential tiers on auth rejection.
    async fn deliver(
        &self,
        recipient: &ServiceId,
        group: Option<&GroupId>,
        message: &OutgoingMessage,
    ) -> Result<DeliveryReceipt, SendError> {
        let credentials = self.credentials_for(recipient, group).await;
        let mut tier = 0usize;
        let mut reconciliations = 0u32;
        let mut stale_refreshed = false;

        loop {
            let credential = &credentials[tier];
            let envelopes = self
                .build_envelopes(recipient, message, &credentials[tier..])
                .await
                .inspect_err(|e| self.log_recipient_error(recipient, e))?;

            let result = self
                .transport
                .send_envelopes(recipient, envelopes, message.timestamp, credential)
                .await;

            let error = match result {
                Ok(receipt) => {
                    debug!(recipient = %recipient, tier = credential.tier(), "delivered");
                    return Ok(receipt);
                }
                Err(e) => e,
            };

            match &error {
                e if e.is_auth_rejected() && credential.is_sealed() && tier + 1 < credentials.len() => {
                    debug!(
                        recipient = %recipient,
                        tier = credential.tier(),
                        "sealed send rejected; falling back to next tier"
                    );
                    tier += 1;
                }
                TransportError::Http {
                    code: 409,
                    mismatch: Some(mismatch),
                    ..
                } if reconciliations < self.max_device_reconciliations => {
                    reconciliations += 1;
                    self.reconcile_mismatch(recipient, mismatch, &credentials[tier..])
                        .await?;
                }
                TransportError::Http {
                    code: 410,
                    mismatch: Some(mismatch),
                    ..
                } if !stale_refreshed => {
                    stale_refreshed = true;
                    self.refresh_stale(recipient, mismatch, &credentials[tier..])
                        .await?;
                }
                TransportError::Http { code: 404, .. } => {
                    self.archive_all(recipient).await?;
                    return Err(SendError::UnregisteredUser {
                        service_id: recipient.clone(),
                    });
                }
                TransportError::Http {
                    code: code @ (409 | 410),
                    ..
                } => {
                    warn!(recipient = %recipient, code, "device list still out of date; giving up");
                    return Err(SendError::NetworkOrServer {
                        code: Some(*code),
                        message: "device list could not be reconciled".into(),
                    });
                }
                e => {
                    let classified = e.classify(recipient);
                    self.log_recipient_error(recipient, &classified);
                    return Err(classified);
                }
            }
        }
    }

    async fn credentials_for(&self, recipient: &ServiceId, group: Option<&GroupId>) -> Vec<Credential> {
        let access_key = match self.conversations.access_key(recipient).await {
            Ok(key) => key,
            Err(e) => {
                warn!(recipient = %recipient, error = %e, "access key lookup failed");
                None
            }
        };
        let group_token = match group {
            Some(group_id) => match self.tokens.get_member(group_id, recipient).await {
                Ok(token) => token.map(|t| t.token),
                Err(e) => {
                    warn!(group = %group_id, error = %e, "group-send token lookup failed");
                    None
                }
            },
            None => None,
        };
        credential_tiers(access_key, group_token)
    }

    async fn build_envelopes(
        &self,
        recipient: &ServiceId,
        message: &OutgoingMessage,
        credentials: &[Credential],
    ) -> Result<Vec<Envelope>, SendError> {
        if let Some(device_id) = message.plaintext_device {
            return Ok(vec![Envelope {
                device_id,
                kind: EnvelopeKind::Plaintext,
                content: message.content.clone(),
            }]);
        }

        let devices = self.ensure_sessions(recipient, credentials).await?;
        let mut envelopes = Vec::with_capacity(devices.len());
        for device_id in devices {
            let address = self.address(recipient, device_id);
            let encrypted = self
                .session_jobs
                .run(&address, || self.protocol.encrypt(&address, &message.content))
                .await;
            match encrypted {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => return Err(classify_protocol_error(recipient, e)),
            }
        }
        Ok(envelopes)
    }

    /// Devices of `recipient` with a usable session, fetching bundles where needed.
    async fn ensure_sessions(
        &self,
        recipient: &ServiceId,
        credentials: &[Credential],
    ) -> Result<Vec<DeviceId>, SendError> {
        let known = self
            .protocol
            .device_ids(&self.our.service_id, recipient)
            .await
            .map_err(|e| SendError::Fatal(e.to_string()))?;

        if known.is_empty() {
            let bundles = self.fetcher.fetch(recipient, None, credentials).await?;
            self.negotiator.establish(&bundles).await?;
            return Ok(bundles.device_ids());
        }

        for device_id in &known {
            let address = self.address(recipient, *device_id);
            let state = self
                .protocol
                .session_state(&address)
                .await
                .map_err(|e| SendError::Fatal(e.to_string()))?;
            match state {
                SessionState::Established => {}
                SessionState::Untrusted => {
                    return Err(SendError::UntrustedIdentity {
                        service_id: recipient.clone(),
                    });
                }
                SessionState::Absent => {
                    let bundles = self
                        .fetcher
                        .fetch(recipient, Some(*device_id), credentials)
                        .await?;
                    self.negotiator.establish(&bundles).await?;
                }
            }
        }
        Ok(known)
    }

    async fn reconcile_mismatch(
        &self,
        recipient: &ServiceId,
        mismatch: &DeviceMismatch,
        credentials: &[Credential],
    ) -> Result<(), SendError> {
        info!(
            recipient = %recipient,
            missing = ?mismatch.missing_devices,
            extra = ?mismatch.extra_devices,
            "reconciling mismatched devices"
        );
        self.archive_devices(recipient, &mismatch.extra_devices).await?;
        for device_id in &mismatch.missing_devices {
            let bundles = self
                .fetcher
                .fetch(recipient, Some(*device_id), credentials)
                .await?;
            self.negotiator.establish(&bundles).await?;
        }
        Ok(())
    }

    async fn refresh_stale(
        &self,
        recipient: &ServiceId,
        mismatch: &DeviceMismatch,
        credentials: &[Credential],
    ) -> Result<(), SendError> {
        info!(recipient = %recipient, stale = ?mismatch.stale_devices, "refreshing stale devices");
        self.archive_devices(recipient, &mismatch.stale_devices).await?;
        for device_id in &mismatch.stale_devices {
            let bundles = self
                .fetcher
                .fetch(recipient, Some(*device_id), credentials)
                .await?;
            self.negotiator.establish(&bundles).await?;
        }
        Ok(())
    }

    async fn archive_devices(&self, recipient: &ServiceId, devices: &[DeviceId]) -> Result<(), SendError> {
        for device_id in devices {
            let address = self.address(recipient, *device_id);
            self.session_jobs
                .run(&address, || self.protocol.archive_session(&address))
                .await
                .map_err(|e| SendError::Fatal(e.to_string()))?;
        }
        Ok(())
    }

    async fn archive_all(&self, recipient: &ServiceId) -> Result<(), SendError> {
        self.protocol
            .archive_all_sessions(&self.our.service_id, recipient)
            .await
            .map_err(|e| SendError::Fatal(e.to_string()))
    }

    fn address(&self, recipient: &ServiceId, device_id: DeviceId) -> QualifiedAddress {
        QualifiedAddress::new(
            self.our.service_id.clone(),
            Address::new(recipient.clone(), device_id),
        )
    }

    fn log_recipient_error(&self, recipient: &ServiceId, error: &SendError) {
        match error {
            SendError::MalformedBundle { .. } => {
                warn!(recipient = %recipient, error = %error, "protocol integrity failure")
            }
            _ => debug!(recipient = %recipient, error = %error, "send to recipient failed"),
        }
    }

    /// Archive every session with `recipient` after an identity change.
    async fn archive_untrusted(&self, recipient: &ServiceId) {
        info!(recipient = %recipient, "identity untrusted; archiving sessions");
        if let Err(e) = self.archive_all(recipient).await {
            warn!(recipient = %recipient, error = %e, "failed to archive sessions");
        }
    }
}
