// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock transport capturing every envelope batch.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use courier_core::types::{DeliveryReceipt, Envelope};
use courier_core::{Credential, ServiceId, Transport, TransportError};

/// One captured `send_envelopes` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentBatch {
    pub service_id: ServiceId,
    pub envelopes: Vec<Envelope>,
    pub timestamp: u64,
    pub tier: &'static str,
}

/// Succeeds unless a response was scripted for the recipient.
#[derive(Default)]
pub struct MockTransport {
    scripted: Mutex<HashMap<ServiceId, VecDeque<TransportError>>>,
    reject_sealed: Mutex<HashSet<ServiceId>>,
    sent: Mutex<Vec<SentBatch>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next send to `service_id` with `error`. Calls queue up.
    pub async fn fail_next(&self, service_id: impl Into<ServiceId>, error: TransportError) {
        self.scripted
            .lock()
            .await
            .entry(service_id.into())
            .or_default()
            .push_back(error);
    }

    /// Answer 401 to every sealed send to `service_id`.
    pub async fn reject_sealed(&self, service_id: impl Into<ServiceId>) {
        self.reject_sealed.lock().await.insert(service_id.into());
    }

    /// Every attempted send, including failed ones.
    pub async fn sent(&self) -> Vec<SentBatch> {
        self.sent.lock().await.clone()
    }

    pub async fn send_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn sends_to(&self, service_id: &ServiceId) -> Vec<SentBatch> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|batch| batch.service_id == *service_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_envelopes(
        &self,
        service_id: &ServiceId,
        envelopes: Vec<Envelope>,
        timestamp: u64,
        credential: &Credential,
    ) -> Result<DeliveryReceipt, TransportError> {
        self.sent.lock().await.push(SentBatch {
            service_id: service_id.clone(),
            envelopes,
            timestamp,
            tier: credential.tier(),
        });

        if let Some(error) = self
            .scripted
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
        Ok(DeliveryReceipt {
            unidentified: credential.is_sealed(),
        })
    }
}
