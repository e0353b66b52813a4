// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry placeholder queries.

use chrono::{DateTime, Utc};
use courier_core::{CourierError, DestinationId, ServiceId};
use rusqlite::{params, OptionalExtension};

use crate::database::{map_tr_err, Database};
use crate::models::{from_millis, to_millis, RetryPlaceholder};

/// Insert a placeholder, replacing any previous one for the same message.
pub async fn upsert(db: &Database, placeholder: &RetryPlaceholder) -> Result<(), CourierError> {
    let p = placeholder.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO retry_placeholders
                 (sender_id, sent_at, destination_id, received_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    p.sender_id.0,
                    p.sent_at as i64,
                    p.destination_id.0,
                    to_millis(p.received_at),
                    to_millis(p.expires_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Remove and return the placeholder for one message, if present.
pub async fn take(
    db: &Database,
    sender_id: &ServiceId,
    sent_at: u64,
) -> Result<Option<RetryPlaceholder>, CourierError> {
    let sender = sender_id.0.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let found = tx
                .query_row(
                    "SELECT sender_id, sent_at, destination_id, received_at, expires_at
                     FROM retry_placeholders WHERE sender_id = ?1 AND sent_at = ?2",
                    params![sender, sent_at as i64],
                    row_to_placeholder,
                )
                .optional()?;
            if found.is_some() {
                tx.execute(
                    "DELETE FROM retry_placeholders WHERE sender_id = ?1 AND sent_at = ?2",
                    params![sender, sent_at as i64],
                )?;
            }
            tx.commit()?;
            Ok(found)
        })
        .await
        .map_err(map_tr_err)
}

/// Remove and return every placeholder whose expiry is at or before `now`.
pub async fn take_expired(
    db: &Database,
    now: DateTime<Utc>,
) -> Result<Vec<RetryPlaceholder>, CourierError> {
    let cutoff = to_millis(now);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let expired = {
                let mut stmt = tx.prepare(
                    "SELECT sender_id, sent_at, destination_id, received_at, expires_at
                     FROM retry_placeholders WHERE expires_at <= ?1
                     ORDER BY expires_at ASC",
                )?;
                stmt.query_map(params![cutoff], row_to_placeholder)?
                    .collect::<Result<Vec<_>, _>>()?
            };
            tx.execute(
                "DELETE FROM retry_placeholders WHERE expires_at <= ?1",
                params![cutoff],
            )?;
            tx.commit()?;
            Ok(expired)
        })
        .await
        .map_err(map_tr_err)
}

/// Number of placeholders currently stored.
pub async fn count(db: &Database) -> Result<i64, CourierError> {
    db.connection()
        .call(|conn| conn.query_row("SELECT COUNT(*) FROM retry_placeholders", [], |row| row.get(0)))
        .await
        .map_err(map_tr_err)
}

fn row_to_placeholder(row: &rusqlite::Row<'_>) -> rusqlite::Result<RetryPlaceholder> {
    let sent_at: i64 = row.get(1)?;
    Ok(RetryPlaceholder {
        sender_id: ServiceId(row.get(0)?),
        sent_at: sent_at.max(0) as u64,
        destination_id: DestinationId(row.get(2)?),
        received_at: from_millis(row.get(3)?),
        expires_at: from_millis(row.get(4)?),
    })
}
