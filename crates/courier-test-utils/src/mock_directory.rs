// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock directory service for deterministic key fetches.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use courier_core::types::RawPrekeyBundle;
use courier_core::{Credential, DeviceId, DirectoryService, ServiceId, TransportError};

/// One recorded `get_prekey_bundle` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryCall {
    pub service_id: ServiceId,
    pub device: Option<DeviceId>,
    pub tier: &'static str,
}

/// Serves registered bundles; unknown accounts answer 404.
///
/// Scripted failures are consumed first, in order, per account.
#[derive(Default)]
pub struct MockDirectory {
    bundles: Mutex<HashMap<ServiceId, RawPrekeyBundle>>,
    failures: Mutex<HashMap<ServiceId, VecDeque<TransportError>>>,
    reject_sealed: Mutex<HashSet<ServiceId>>,
    calls: Mutex<Vec<DirectoryCall>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the bundle served for `service_id`.
    pub async fn insert(&self, service_id: impl Into<ServiceId>, bundle: RawPrekeyBundle) {
        self.bundles.lock().await.insert(service_id.into(), bundle);
    }

    /// Fail the next fetch for `service_id` with `error`.
    pub async fn fail_next(&self, service_id: impl Into<ServiceId>, error: TransportError) {
        self.failures
            .lock()
            .await
            .entry(service_id.into())
            .or_default()
            .push_back(error);
    }

    /// Answer 401 to every sealed-credential fetch for `service_id`.
    pub async fn reject_sealed(&self, service_id: impl Into<ServiceId>) {
        self.reject_sealed.lock().await.insert(service_id.into());
    }

    pub async fn calls(&self) -> Vec<DirectoryCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl DirectoryService for MockDirectory {
    async fn get_prekey_bundle(
        &self,
        service_id: &ServiceId,
        device: Option<DeviceId>,
        credential: &Credential,
    ) -> Result<RawPrekeyBundle, TransportError> {
        self.calls.lock().await.push(DirectoryCall {
            service_id: service_id.clone(),
            device,
            tier: credential.tier(),
        });

        if let Some(error) = self
            .failures
            .lock()
            .await
            .get_mut(service_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        if credential.is_sealed() && self.reject_sealed.lock().await.contains(service_id) {
            return Err(TransportError::status(401));
        }

        let Some(mut bundle) = self.bundles.lock().await.get(service_id).cloned() else {
            return Err(TransportError::status(404));
        };
        if let Some(device_id) = device {
            bundle.devices.retain(|d| d.device_id == device_id);
            if bundle.devices.is_empty() {
                return Err(TransportError::status(404));
            }
        }
        Ok(bundle)
    }
}
