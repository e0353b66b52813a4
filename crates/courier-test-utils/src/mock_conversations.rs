// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory conversation store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use courier_core::types::{AccessKey, SentPayload};
use courier_core::{
    Conversation, ConversationKind, ConversationStore, CourierError, DestinationId, ServiceId,
};

#[derive(Default)]
pub struct MockConversations {
    conversations: Mutex<HashMap<DestinationId, Conversation>>,
    access_keys: Mutex<HashMap<ServiceId, AccessKey>>,
    sent: Mutex<HashMap<(ServiceId, u64), SentPayload>>,
}

impl MockConversations {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, conversation: Conversation) {
        self.conversations
            .lock()
            .await
            .insert(conversation.id.clone(), conversation);
    }

    /// Apply `change` to a stored conversation. Returns false if it is unknown.
    pub async fn update(&self, id: &DestinationId, change: impl FnOnce(&mut Conversation)) -> bool {
        match self.conversations.lock().await.get_mut(id) {
            Some(conversation) => {
                change(conversation);
                true
            }
            None => false,
        }
    }

    pub async fn set_access_key(&self, service_id: impl Into<ServiceId>, key: AccessKey) {
        self.access_keys.lock().await.insert(service_id.into(), key);
    }

    /// Record content as sent to `recipient`, for retry-request lookups.
    pub async fn record_sent(&self, recipient: impl Into<ServiceId>, payload: SentPayload) {
        self.sent
            .lock()
            .await
            .insert((recipient.into(), payload.timestamp), payload);
    }
}

#[async_trait]
impl ConversationStore for MockConversations {
    async fn get(&self, id: &DestinationId) -> Result<Option<Conversation>, CourierError> {
        Ok(self.conversations.lock().await.get(id).cloned())
    }

    async fn find_direct(
        &self,
        service_id: &ServiceId,
    ) -> Result<Option<Conversation>, CourierError> {
        Ok(self
            .conversations
            .lock()
            .await
            .values()
            .find(|c| {
                matches!(&c.kind, ConversationKind::Direct { service_id: peer } if peer == service_id)
            })
            .cloned())
    }

    async fn access_key(&self, service_id: &ServiceId) -> Result<Option<AccessKey>, CourierError> {
        Ok(self.access_keys.lock().await.get(service_id).cloned())
    }

    async fn find_sent(
        &self,
        recipient: &ServiceId,
        timestamp: u64,
    ) -> Result<Option<SentPayload>, CourierError> {
        Ok(self
            .sent
            .lock()
            .await
            .get(&(recipient.clone(), timestamp))
            .cloned())
    }
}
