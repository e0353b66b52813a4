// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message transport trait.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{Credential, DeliveryReceipt, Envelope, ServiceId};

/// Server endpoint that accepts per-device envelopes for one account.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver `envelopes` (one per device) to `service_id`.
    ///
    /// 409/410 responses carry a [`DeviceMismatch`](crate::types::DeviceMismatch)
    /// in the returned error.
    async fn send_envelopes(
        &self,
        service_id: &ServiceId,
        envelopes: Vec<Envelope>,
        timestamp: u64,
        credential: &Credential,
    ) -> Result<DeliveryReceipt, TransportError>;
}
