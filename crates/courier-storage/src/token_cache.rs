// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-group cache of group-send authorization tokens.
//!
//! Replace-on-write only: the combined token is bound to the full member set,
//! so a group's rows are rewritten together or not at all. Expired entries are
//! never served.

use chrono::{DateTime, Utc};
use courier_core::{CourierError, GroupId, ServiceId};
use tracing::{debug, warn};

use crate::database::Database;
use crate::models::{CombinedToken, GroupSendTokens, MemberToken};
use crate::queries::group_send_tokens as q;

/// SQLite-backed group-send token cache.
#[derive(Clone)]
pub struct GroupSendTokenCache {
    db: Database,
}

impl GroupSendTokenCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Atomically replace everything cached for `group_id`.
    ///
    /// Every member token must belong to `group_id` and appear once; otherwise
    /// nothing is written.
    pub async fn replace_all(
        &self,
        group_id: &GroupId,
        token: Vec<u8>,
        expires_at: DateTime<Utc>,
        members: Vec<MemberToken>,
    ) -> Result<(), CourierError> {
        let mut seen = std::collections::HashSet::new();
        for member in &members {
            if &member.group_id != group_id {
                warn!(
                    group = %group_id,
                    member_group = %member.group_id,
                    "rejecting token replace with foreign member"
                );
                return Err(CourierError::Internal(format!(
                    "member token for {} belongs to group {}, not {}",
                    member.member_id, member.group_id, group_id
                )));
            }
            if !seen.insert(&member.member_id) {
                return Err(CourierError::Internal(format!(
                    "duplicate member token for {} in group {}",
                    member.member_id, group_id
                )));
            }
        }

        let count = members.len();
        let combined = CombinedToken {
            group_id: group_id.clone(),
            token,
            expires_at,
        };
        q::replace_all(&self.db, combined, members).await?;
        debug!(group = %group_id, members = count, "replaced group-send tokens");
        Ok(())
    }

    /// Expiration of the group's combined token, if cached and still valid.
    pub async fn get(&self, group_id: &GroupId) -> Result<Option<DateTime<Utc>>, CourierError> {
        self.get_at(group_id, Utc::now()).await
    }

    pub async fn get_at(
        &self,
        group_id: &GroupId,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, CourierError> {
        Ok(q::combined_token(&self.db, group_id)
            .await?
            .filter(|c| c.expires_at > now)
            .map(|c| c.expires_at))
    }

    /// One member's token, if cached and still valid.
    pub async fn get_member(
        &self,
        group_id: &GroupId,
        member_id: &ServiceId,
    ) -> Result<Option<MemberToken>, CourierError> {
        self.get_member_at(group_id, member_id, Utc::now()).await
    }

    pub async fn get_member_at(
        &self,
        group_id: &GroupId,
        member_id: &ServiceId,
        now: DateTime<Utc>,
    ) -> Result<Option<MemberToken>, CourierError> {
        Ok(q::member_token(&self.db, group_id, member_id)
            .await?
            .filter(|m| !m.is_expired_at(now)))
    }

    /// Everything cached for the group, including expired rows. For inspection.
    pub async fn get_all(&self, group_id: &GroupId) -> Result<Option<GroupSendTokens>, CourierError> {
        q::load_group(&self.db, group_id).await
    }

    /// Groups that currently have a cached combined token.
    pub async fn groups(&self) -> Result<Vec<GroupId>, CourierError> {
        q::list_groups(&self.db).await
    }

    pub async fn delete_all(&self, group_id: &GroupId) -> Result<(), CourierError> {
        let removed = q::delete_all(&self.db, group_id).await?;
        debug!(group = %group_id, removed, "deleted group-send tokens");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn member(group: &str, id: &str, expires_at: DateTime<Utc>) -> MemberToken {
        MemberToken {
            group_id: GroupId::from(group),
            member_id: ServiceId::from(id),
            token: id.as_bytes().to_vec(),
            expires_at,
        }
    }

    async fn cache() -> GroupSendTokenCache {
        GroupSendTokenCache::new(Database::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn replace_then_get() {
        let cache = cache().await;
        let group = GroupId::from("g1");
        let expires = Utc::now() + Duration::hours(2);

        cache
            .replace_all(
                &group,
                b"combined".to_vec(),
                expires,
                vec![member("g1", "alice", expires), member("g1", "bob", expires)],
            )
            .await
            .unwrap();

        let got = cache.get(&group).await.unwrap().unwrap();
        assert_eq!(got.timestamp_millis(), expires.timestamp_millis());
        let alice = cache
            .get_member(&group, &ServiceId::from("alice"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alice.token, b"alice".to_vec());
    }

    #[tokio::test]
    async fn replace_drops_previous_members() {
        let cache = cache().await;
        let group = GroupId::from("g1");
        let expires = Utc::now() + Duration::hours(2);

        cache
            .replace_all(
                &group,
                b"v1".to_vec(),
                expires,
                vec![member("g1", "alice", expires), member("g1", "bob", expires)],
            )
            .await
            .unwrap();
        cache
            .replace_all(
                &group,
                b"v2".to_vec(),
                expires,
                vec![member("g1", "carol", expires)],
            )
            .await
            .unwrap();

        let all = cache.get_all(&group).await.unwrap().unwrap();
        assert_eq!(all.combined.token, b"v2".to_vec());
        assert_eq!(all.members.len(), 1);
        assert_eq!(all.members[0].member_id, ServiceId::from("carol"));
        assert!(cache
            .get_member(&group, &ServiceId::from("bob"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_not_served() {
        let cache = cache().await;
        let group = GroupId::from("g1");
        let now = Utc::now();
        let past = now - Duration::minutes(1);

        cache
            .replace_all(&group, b"old".to_vec(), past, vec![member("g1", "alice", past)])
            .await
            .unwrap();

        assert!(cache.get_at(&group, now).await.unwrap().is_none());
        assert!(cache
            .get_member_at(&group, &ServiceId::from("alice"), now)
            .await
            .unwrap()
            .is_none());
        // Still present for inspection until replaced.
        assert!(cache.get_all(&group).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn foreign_member_writes_nothing() {
        let cache = cache().await;
        let group = GroupId::from("g1");
        let expires = Utc::now() + Duration::hours(1);

        cache
            .replace_all(&group, b"keep".to_vec(), expires, vec![member("g1", "alice", expires)])
            .await
            .unwrap();
        let err = cache
            .replace_all(
                &group,
                b"bad".to_vec(),
                expires,
                vec![member("g1", "bob", expires), member("g2", "eve", expires)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::Internal(_)));

        let all = cache.get_all(&group).await.unwrap().unwrap();
        assert_eq!(all.combined.token, b"keep".to_vec());
        assert_eq!(all.members.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_member_is_rejected() {
        let cache = cache().await;
        let group = GroupId::from("g1");
        let expires = Utc::now() + Duration::hours(1);
        let err = cache
            .replace_all(
                &group,
                b"t".to_vec(),
                expires,
                vec![member("g1", "alice", expires), member("g1", "alice", expires)],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
        assert!(cache.get_all(&group).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_all_is_scoped_to_group() {
        let cache = cache().await;
        let expires = Utc::now() + Duration::hours(1);
        for g in ["g1", "g2"] {
            cache
                .replace_all(
                    &GroupId::from(g),
                    g.as_bytes().to_vec(),
                    expires,
                    vec![member(g, "alice", expires)],
                )
                .await
                .unwrap();
        }

        cache.delete_all(&GroupId::from("g1")).await.unwrap();

        assert!(cache.get(&GroupId::from("g1")).await.unwrap().is_none());
        assert!(cache.get(&GroupId::from("g2")).await.unwrap().is_some());
        assert_eq!(cache.groups().await.unwrap(), vec![GroupId::from("g2")]);
    }

    #[tokio::test]
    async fn readers_never_mix_generations() {
        let cache = cache().await;
        let group = GroupId::from("g1");
        let expires = Utc::now() + Duration::hours(1);
        let generation = |n: u32| {
            let members = ["alice", "bob", "carol"]
                .iter()
                .map(|id| MemberToken {
                    group_id: GroupId::from("g1"),
                    member_id: ServiceId::from(*id),
                    token: format!("v{n}").into_bytes(),
                    expires_at: expires,
                })
                .collect::<Vec<_>>();
            (format!("v{n}").into_bytes(), members)
        };

        let (combined, members) = generation(0);
        cache.replace_all(&group, combined, expires, members).await.unwrap();

        let writer = async {
            for n in 1..=30 {
                let (combined, members) = generation(n);
                cache.replace_all(&group, combined, expires, members).await.unwrap();
            }
        };
        let reader = async {
            for _ in 0..60 {
                let all = cache.get_all(&group).await.unwrap().unwrap();
                assert_eq!(all.members.len(), 3);
                for m in &all.members {
                    assert_eq!(m.token, all.combined.token, "mixed generations");
                }
                tokio::task::yield_now().await;
            }
        };
        tokio::join!(writer, reader);
    }
}
