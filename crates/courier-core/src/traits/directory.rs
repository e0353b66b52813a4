// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Directory (keys) service trait.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{Credential, DeviceId, RawPrekeyBundle, ServiceId};

/// Server endpoint that hands out prekey bundles.
#[async_trait]
pub trait DirectoryService: Send + Sync + 'static {
    /// Fetch bundles for one device, or for every device when `device` is `None`.
    async fn get_prekey_bundle(
        &self,
        service_id: &ServiceId,
        device: Option<DeviceId>,
        credential: &Credential,
    ) -> Result<RawPrekeyBundle, TransportError>;
}
