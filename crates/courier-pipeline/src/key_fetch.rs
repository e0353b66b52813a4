// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prekey bundle fetching with credential-tier fallback.
//!
//! Tiers are tried in order: unidentified-sender access key, group-send
//! token, then an authenticated request. A 401/403 on a sealed tier means
//! "this credential was rejected" and moves on to the next tier.

use std::sync::Arc;

use courier_core::types::{AccessKey, PrekeyBundleSet};
use courier_core::{
    Credential, DeviceId, DirectoryService, LocalIdentity, ProtocolStore, SendError, ServiceId,
    TransportError,
};
use tracing::{debug, info, warn};

/// Credential chain for one recipient, most private first. Always ends with
/// [`Credential::Authenticated`].
pub fn credential_tiers(
    access_key: Option<AccessKey>,
    group_send_token: Option<Vec<u8>>,
) -> Vec<Credential> {
    let mut tiers = Vec::with_capacity(3);
    if let Some(key) = access_key {
        tiers.push(Credential::AccessKey(key));
    }
    if let Some(token) = group_send_token {
        tiers.push(Credential::GroupSendToken(token));
    }
    tiers.push(Credential::Authenticated);
    tiers
}

/// Fetches and validates prekey bundles from the directory.
pub struct KeyBundleFetcher {
    our: LocalIdentity,
    directory: Arc<dyn DirectoryService>,
    protocol: Arc<dyn ProtocolStore>,
}

impl KeyBundleFetcher {
    pub fn new(
        our: LocalIdentity,
        directory: Arc<dyn DirectoryService>,
        protocol: Arc<dyn ProtocolStore>,
    ) -> Self {
        Self {
            our,
            directory,
            protocol,
        }
    }

    /// Fetch bundles for `service_id` (one device, or all when `device` is `None`).
    ///
    /// A 404 archives every session with `service_id` before failing with
    /// `UnregisteredUser`: the account no longer exists.
    pub async fn fetch(
        &self,
        service_id: &ServiceId,
        device: Option<DeviceId>,
        credentials: &[Credential],
    ) -> Result<PrekeyBundleSet, SendError> {
        let mut last_rejection: Option<TransportError> = None;

        for credential in credentials {
            match self
                .directory
                .get_prekey_bundle(service_id, device, credential)
                .await
            {
                Ok(raw) => {
                    let bundles = PrekeyBundleSet::validate(service_id, raw).inspect_err(|e| {
                        warn!(recipient = %service_id, error = %e, "rejecting malformed prekey bundle");
                    })?;
                    debug!(
                        recipient = %service_id,
                        devices = bundles.devices.len(),
                        tier = credential.tier(),
                        "fetched prekey bundles"
                    );
                    return Ok(bundles);
                }
                Err(e) if e.is_auth_rejected() && credential.is_sealed() => {
                    debug!(
                        recipient = %service_id,
                        tier = credential.tier(),
                        "credential rejected; trying next tier"
                    );
                    last_rejection = Some(e);
                }
                Err(e) if e.code() == Some(404) => {
                    return Err(self.unregistered(service_id).await);
                }
                Err(e) => return Err(e.classify(service_id)),
            }
        }

        Err(last_rejection
            .map(|e| e.classify(service_id))
            .unwrap_or_else(|| SendError::Fatal(format!("no credentials to fetch keys for {service_id}"))))
    }

    async fn unregistered(&self, service_id: &ServiceId) -> SendError {
        info!(recipient = %service_id, "account not found; archiving all sessions");
        if let Err(e) = self
            .protocol
            .archive_all_sessions(&self.our.service_id, service_id)
            .await
        {
            warn!(recipient = %service_id, error = %e, "failed to archive sessions");
            return SendError::Fatal(format!("failed to archive sessions for {service_id}: {e}"));
        }
        SendError::UnregisteredUser {
            service_id: service_id.clone(),
        }
    }
}
