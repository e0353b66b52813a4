// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the group-send token cache and the retry placeholder store.

use chrono::{DateTime, TimeZone, Utc};
use courier_core::{DestinationId, GroupId, ServiceId};

/// The group-wide token, cryptographically bound to the full member set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedToken {
    pub group_id: GroupId,
    pub token: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// A token authorizing a send to a single member of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberToken {
    pub group_id: GroupId,
    pub member_id: ServiceId,
    pub token: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

impl MemberToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Everything cached for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSendTokens {
    pub combined: CombinedToken,
    pub members: Vec<MemberToken>,
}

/// A message we asked a peer to resend and are still waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPlaceholder {
    pub sender_id: ServiceId,
    /// Timestamp of the original (undecryptable) message.
    pub sent_at: u64,
    /// Conversation the placeholder belongs to.
    pub destination_id: DestinationId,
    pub received_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
