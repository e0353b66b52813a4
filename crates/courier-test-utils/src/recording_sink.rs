// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery sink that records every report for assertion.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use courier_core::{DeliverySink, DestinationId, RecipientError, ServiceId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    SendFailed {
        destination: DestinationId,
        timestamp: u64,
        errors: Vec<RecipientError>,
    },
    UntrustedIdentity {
        destination: DestinationId,
        service_ids: Vec<ServiceId>,
    },
    DeliveryIssue {
        destination: DestinationId,
        sender: ServiceId,
        sent_at: u64,
    },
    Challenge {
        destination: DestinationId,
        show_captcha: bool,
        retry_after: Option<Duration>,
    },
    SessionRefreshed {
        destination: DestinationId,
        peer: ServiceId,
    },
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().await.clone()
    }

    pub async fn delivery_issues(&self) -> usize {
        self.count(|e| matches!(e, SinkEvent::DeliveryIssue { .. }))
            .await
    }

    pub async fn send_failures(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| matches!(e, SinkEvent::SendFailed { .. }))
            .cloned()
            .collect()
    }

    async fn count(&self, predicate: impl Fn(&SinkEvent) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| predicate(e)).count()
    }

    async fn push(&self, event: SinkEvent) {
        self.events.lock().await.push(event);
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn report_send_failed(
        &self,
        destination: &DestinationId,
        timestamp: u64,
        errors: &[RecipientError],
    ) {
        self.push(SinkEvent::SendFailed {
            destination: destination.clone(),
            timestamp,
            errors: errors.to_vec(),
        })
        .await;
    }

    async fn report_untrusted_identity(&self, destination: &DestinationId, service_ids: &[ServiceId]) {
        self.push(SinkEvent::UntrustedIdentity {
            destination: destination.clone(),
            service_ids: service_ids.to_vec(),
        })
        .await;
    }

    async fn report_delivery_issue(&self, destination: &DestinationId, sender: &ServiceId, sent_at: u64) {
        self.push(SinkEvent::DeliveryIssue {
            destination: destination.clone(),
            sender: sender.clone(),
            sent_at,
        })
        .await;
    }

    async fn report_challenge(
        &self,
        destination: &DestinationId,
        show_captcha: bool,
        retry_after: Option<Duration>,
    ) {
        self.push(SinkEvent::Challenge {
            destination: destination.clone(),
            show_captcha,
            retry_after,
        })
        .await;
    }

    async fn report_session_refreshed(&self, destination: &DestinationId, peer: &ServiceId) {
        self.push(SinkEvent::SessionRefreshed {
            destination: destination.clone(),
            peer: peer.clone(),
        })
        .await;
    }
}
