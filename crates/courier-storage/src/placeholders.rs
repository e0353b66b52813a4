// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Placeholders for messages we asked a peer to resend.

use chrono::{DateTime, Duration, Utc};
use courier_core::{CourierError, DestinationId, ServiceId};
use tracing::debug;

use crate::database::Database;
use crate::models::RetryPlaceholder;
use crate::queries::placeholders as q;

#[derive(Clone)]
pub struct RetryPlaceholderStore {
    db: Database,
    ttl: Duration,
}

impl RetryPlaceholderStore {
    pub fn new(db: Database, ttl: std::time::Duration) -> Self {
        Self {
            db,
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
        }
    }

    /// Record that a resend of `(sender_id, sent_at)` is expected in `destination_id`.
    pub async fn add(
        &self,
        sender_id: &ServiceId,
        sent_at: u64,
        destination_id: &DestinationId,
        received_at: DateTime<Utc>,
    ) -> Result<RetryPlaceholder, CourierError> {
        let placeholder = RetryPlaceholder {
            sender_id: sender_id.clone(),
            sent_at,
            destination_id: destination_id.clone(),
            received_at,
            expires_at: received_at
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        q::upsert(&self.db, &placeholder).await?;
        debug!(sender = %sender_id, sent_at, "added retry placeholder");
        Ok(placeholder)
    }

    /// Claim the placeholder for a message that has now arrived.
    pub async fn take(
        &self,
        sender_id: &ServiceId,
        sent_at: u64,
    ) -> Result<Option<RetryPlaceholder>, CourierError> {
        q::take(&self.db, sender_id, sent_at).await
    }

    /// Remove and return every placeholder that expired at or before `now`.
    pub async fn take_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RetryPlaceholder>, CourierError> {
        let expired = q::take_expired(&self.db, now).await?;
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired retry placeholders");
        }
        Ok(expired)
    }

    pub async fn count(&self) -> Result<usize, CourierError> {
        Ok(q::count(&self.db).await?.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> RetryPlaceholderStore {
        RetryPlaceholderStore::new(
            Database::open_in_memory().await.unwrap(),
            std::time::Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn add_sets_expiry_from_ttl() {
        let store = store().await;
        let received = Utc::now();
        let p = store
            .add(&ServiceId::from("bob"), 1000, &DestinationId::from("c1"), received)
            .await
            .unwrap();
        assert_eq!(p.expires_at - p.received_at, Duration::hours(1));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn take_removes_the_placeholder() {
        let store = store().await;
        let bob = ServiceId::from("bob");
        store
            .add(&bob, 1000, &DestinationId::from("c1"), Utc::now())
            .await
            .unwrap();

        let taken = store.take(&bob, 1000).await.unwrap().unwrap();
        assert_eq!(taken.destination_id, DestinationId::from("c1"));
        assert!(store.take(&bob, 1000).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn re_adding_replaces_instead_of_duplicating() {
        let store = store().await;
        let bob = ServiceId::from("bob");
        let first = Utc::now();
        store.add(&bob, 7, &DestinationId::from("c1"), first).await.unwrap();
        store
            .add(&bob, 7, &DestinationId::from("c1"), first + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn take_expired_only_returns_due_entries() {
        let store = store().await;
        let now = Utc::now();
        store
            .add(
                &ServiceId::from("old"),
                1,
                &DestinationId::from("c1"),
                now - Duration::hours(2),
            )
            .await
            .unwrap();
        store
            .add(&ServiceId::from("fresh"), 2, &DestinationId::from("c2"), now)
            .await
            .unwrap();

        let expired = store.take_expired(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].sender_id, ServiceId::from("old"));
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
