// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `courier check`, `migrate`, `tokens` and `placeholders` implementations.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_config::CourierConfig;
use courier_core::{CourierError, GroupId};
use courier_pipeline::QueueSettings;
use courier_storage::{Database, GroupSendTokenCache, GroupSendTokens, RetryPlaceholderStore};
use serde::Serialize;
use tracing::info;

/// Cached tokens for one group, as shown to the operator.
#[derive(Debug, Serialize)]
pub struct TokenReport {
    pub group_id: String,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
    pub members: Vec<MemberReport>,
}

#[derive(Debug, Serialize)]
pub struct MemberReport {
    pub member_id: String,
    pub expires_at: DateTime<Utc>,
    pub expired: bool,
}

impl TokenReport {
    pub fn new(tokens: &GroupSendTokens, now: DateTime<Utc>) -> Self {
        Self {
            group_id: tokens.combined.group_id.to_string(),
            expires_at: tokens.combined.expires_at,
            expired: tokens.combined.expires_at <= now,
            members: tokens
                .members
                .iter()
                .map(|m| MemberReport {
                    member_id: m.member_id.to_string(),
                    expires_at: m.expires_at,
                    expired: m.is_expired_at(now),
                })
                .collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "group {}: expires {}{}",
            self.group_id,
            self.expires_at.to_rfc3339(),
            expired_tag(self.expired)
        );
        for member in &self.members {
            let _ = writeln!(
                out,
                "  {}: expires {}{}",
                member.member_id,
                member.expires_at.to_rfc3339(),
                expired_tag(member.expired)
            );
        }
        out
    }
}

fn expired_tag(expired: bool) -> &'static str {
    if expired { " (expired)" } else { "" }
}

/// Effective send settings, one `key: value` per line.
pub fn settings_summary(config: &CourierConfig) -> String {
    let queue = QueueSettings::from_config(&config.queue);
    let attempts_source = if config.queue.max_attempts.is_some() {
        "configured"
    } else {
        "derived"
    };

    let mut out = String::new();
    let _ = writeln!(out, "storage.database_path: {}", config.storage.database_path);
    let _ = writeln!(out, "queue.max_retry_time: {}s", queue.max_retry_time.as_secs());
    let _ = writeln!(out, "queue.max_attempts: {} ({attempts_source})", queue.max_attempts);
    let _ = writeln!(
        out,
        "queue.max_device_reconciliations: {}",
        config.queue.max_device_reconciliations
    );
    let _ = writeln!(out, "retry.default_delay: {}ms", config.retry.default_delay_ms);
    let _ = writeln!(out, "retry.max_delay: {}ms", config.retry.max_delay_ms);
    let _ = writeln!(out, "resend.retry_limit: {}", config.resend.retry_limit);
    let _ = writeln!(out, "resend.placeholder_ttl: {}s", config.resend.placeholder_ttl_secs);
    out
}

/// Load the report for `group`, if anything is cached for it.
pub async fn token_report(
    cache: &GroupSendTokenCache,
    group: &GroupId,
    now: DateTime<Utc>,
) -> Result<Option<TokenReport>, CourierError> {
    Ok(cache
        .get_all(group)
        .await?
        .map(|tokens| TokenReport::new(&tokens, now)))
}

/// Run `courier migrate`.
pub async fn run_migrate(config: &CourierConfig) -> Result<(), CourierError> {
    let db = Database::open(&config.storage.database_path).await?;
    db.close().await?;
    info!(path = %config.storage.database_path, "schema up to date");
    println!("database ready: {}", config.storage.database_path);
    Ok(())
}

/// Run `courier tokens [group]`.
pub async fn run_tokens(
    config: &CourierConfig,
    group: Option<&str>,
    json: bool,
) -> Result<(), CourierError> {
    let db = Database::open(&config.storage.database_path).await?;
    let cache = GroupSendTokenCache::new(db.clone());

    match group {
        None => {
            let groups: Vec<String> = cache.groups().await?.iter().map(ToString::to_string).collect();
            if json {
                println!("{}", to_json(&groups)?);
            } else if groups.is_empty() {
                println!("no cached group-send tokens");
            } else {
                for group in groups {
                    println!("{group}");
                }
            }
        }
        Some(group) => match token_report(&cache, &GroupId::from(group), Utc::now()).await? {
            Some(report) if json => println!("{}", to_json(&report)?),
            Some(report) => print!("{}", report.render()),
            None => println!("no cached tokens for group {group}"),
        },
    }
    db.close().await
}

/// Run `courier placeholders`.
pub async fn run_placeholders(config: &CourierConfig) -> Result<(), CourierError> {
    let db = Database::open(&config.storage.database_path).await?;
    let store = RetryPlaceholderStore::new(
        db.clone(),
        Duration::from_secs(config.resend.placeholder_ttl_secs),
    );
    let count = store.count().await?;
    println!("{count} placeholder(s) waiting for a resent message");
    db.close().await
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CourierError> {
    serde_json::to_string_pretty(value).map_err(|e| CourierError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use courier_core::ServiceId;
    use courier_storage::MemberToken;

    fn member(group: &GroupId, id: &str, expires_at: DateTime<Utc>) -> MemberToken {
        MemberToken {
            group_id: group.clone(),
            member_id: ServiceId::from(id),
            token: vec![7; 16],
            expires_at,
        }
    }

    #[tokio::test]
    async fn report_marks_expired_members() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = GroupSendTokenCache::new(db);
        let group = GroupId::from("g-1");
        let now = Utc::now();
        cache
            .replace_all(
                &group,
                vec![1; 32],
                now + ChronoDuration::hours(1),
                vec![
                    member(&group, "alice", now + ChronoDuration::hours(1)),
                    member(&group, "bob", now - ChronoDuration::minutes(1)),
                ],
            )
            .await
            .unwrap();

        let report = token_report(&cache, &group, now).await.unwrap().unwrap();
        assert_eq!(report.group_id, "g-1");
        assert!(!report.expired);
        let expired: Vec<_> = report
            .members
            .iter()
            .filter(|m| m.expired)
            .map(|m| m.member_id.as_str())
            .collect();
        assert_eq!(expired, vec!["bob"]);

        let text = report.render();
        assert!(text.starts_with("group g-1"));
        assert!(text.contains("bob: expires"));
        assert_eq!(text.matches("(expired)").count(), 1);
    }

    #[tokio::test]
    async fn unknown_group_has_no_report() {
        let db = Database::open_in_memory().await.unwrap();
        let cache = GroupSendTokenCache::new(db);
        let report = token_report(&cache, &GroupId::from("nope"), Utc::now())
            .await
            .unwrap();
        assert!(report.is_none());
    }

    #[test]
    fn summary_says_where_attempt_cap_comes_from() {
        let mut config = CourierConfig::default();
        assert!(settings_summary(&config).contains("(derived)"));

        config.queue.max_attempts = Some(3);
        let summary = settings_summary(&config);
        assert!(summary.contains("queue.max_attempts: 3 (configured)"));
        assert!(summary.contains("queue.max_retry_time: 86400s"));
    }

    #[tokio::test]
    async fn migrate_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("courier.db");
        let mut config = CourierConfig::default();
        config.storage.database_path = path.to_string_lossy().into_owned();

        run_migrate(&config).await.unwrap();
        assert!(path.exists());
    }
}
