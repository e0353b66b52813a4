// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! User-visible side effects emitted by the pipeline.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RecipientError;
use crate::types::{DestinationId, ServiceId};

/// Receives the outcomes the UI layer renders. The pipeline never renders.
#[async_trait]
pub trait DeliverySink: Send + Sync + 'static {
    /// A send ended in failure; `errors` is the per-recipient breakdown.
    async fn report_send_failed(
        &self,
        destination: &DestinationId,
        timestamp: u64,
        errors: &[RecipientError],
    );

    /// Sending stopped because these recipients need a trust decision.
    async fn report_untrusted_identity(&self, destination: &DestinationId, service_ids: &[ServiceId]);

    /// A message from `sender` sent at `sent_at` could not be recovered.
    async fn report_delivery_issue(&self, destination: &DestinationId, sender: &ServiceId, sent_at: u64);

    /// The server requires a challenge before sending resumes.
    async fn report_challenge(
        &self,
        destination: &DestinationId,
        show_captcha: bool,
        retry_after: Option<Duration>,
    );

    /// We reset our session with `peer` after an unrecoverable decryption error.
    async fn report_session_refreshed(&self, destination: &DestinationId, peer: &ServiceId);
}
