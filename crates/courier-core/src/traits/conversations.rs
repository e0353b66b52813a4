// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read access to conversation records and the sent-message log.

use async_trait::async_trait;

use crate::error::CourierError;
use crate::types::{AccessKey, Conversation, DestinationId, SentPayload, ServiceId};

#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    async fn get(&self, id: &DestinationId) -> Result<Option<Conversation>, CourierError>;

    /// The direct conversation with `service_id`, if one exists.
    async fn find_direct(
        &self,
        service_id: &ServiceId,
    ) -> Result<Option<Conversation>, CourierError>;

    /// Unidentified-sender access key for `service_id`, if we have its profile key.
    async fn access_key(&self, service_id: &ServiceId) -> Result<Option<AccessKey>, CourierError>;

    /// Content previously sent to `recipient` with this timestamp.
    async fn find_sent(
        &self,
        recipient: &ServiceId,
        timestamp: u64,
    ) -> Result<Option<SentPayload>, CourierError>;
}
