// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group-send token queries.
//!
//! A group's combined token and its member tokens are only ever written
//! together, inside one transaction, by [`replace_all`].

use courier_core::{CourierError, GroupId, ServiceId};
use rusqlite::{params, OptionalExtension};

use crate::database::{map_tr_err, Database};
use crate::models::{from_millis, to_millis, CombinedToken, GroupSendTokens, MemberToken};

/// Delete every row for the group, then insert the new combined and member tokens.
pub async fn replace_all(
    db: &Database,
    combined: CombinedToken,
    members: Vec<MemberToken>,
) -> Result<(), CourierError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let group_id = combined.group_id.0.clone();
            tx.execute(
                "DELETE FROM group_send_member_tokens WHERE group_id = ?1",
                params![group_id],
            )?;
            tx.execute(
                "DELETE FROM group_send_combined_tokens WHERE group_id = ?1",
                params![group_id],
            )?;
            tx.execute(
                "INSERT INTO group_send_combined_tokens (group_id, token, expires_at)
                 VALUES (?1, ?2, ?3)",
                params![group_id, combined.token, to_millis(combined.expires_at)],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO group_send_member_tokens (group_id, member_id, token, expires_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for member in &members {
                    stmt.execute(params![
                        member.group_id.0,
                        member.member_id.0,
                        member.token,
                        to_millis(member.expires_at),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Load the combined token row for a group, expired or not.
pub async fn combined_token(
    db: &Database,
    group_id: &GroupId,
) -> Result<Option<CombinedToken>, CourierError> {
    let group_id = group_id.0.clone();
    db.connection()
        .call(move |conn| read_combined(conn, &group_id))
        .await
        .map_err(map_tr_err)
}

fn read_combined(
    conn: &rusqlite::Connection,
    group_id: &str,
) -> Result<Option<CombinedToken>, rusqlite::Error> {
    conn.query_row(
        "SELECT group_id, token, expires_at FROM group_send_combined_tokens
         WHERE group_id = ?1",
        params![group_id],
        |row| {
            Ok(CombinedToken {
                group_id: GroupId(row.get(0)?),
                token: row.get(1)?,
                expires_at: from_millis(row.get(2)?),
            })
        },
    )
    .optional()
}

/// Load one member token row, expired or not.
pub async fn member_token(
    db: &Database,
    group_id: &GroupId,
    member_id: &ServiceId,
) -> Result<Option<MemberToken>, CourierError> {
    let group_id = group_id.0.clone();
    let member_id = member_id.0.clone();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT group_id, member_id, token, expires_at FROM group_send_member_tokens
                 WHERE group_id = ?1 AND member_id = ?2",
                params![group_id, member_id],
                row_to_member,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Load the combined token with every member token of the group.
///
/// Both reads share one transaction so they always see the same generation.
pub async fn load_group(
    db: &Database,
    group_id: &GroupId,
) -> Result<Option<GroupSendTokens>, CourierError> {
    let group_id = group_id.0.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(combined) = read_combined(&tx, &group_id)? else {
                return Ok(None);
            };
            let members = {
                let mut stmt = tx.prepare(
                    "SELECT group_id, member_id, token, expires_at FROM group_send_member_tokens
                     WHERE group_id = ?1 ORDER BY member_id ASC",
                )?;
                stmt.query_map(params![group_id], row_to_member)?
                    .collect::<Result<Vec<_>, _>>()?
            };
            tx.commit()?;
            Ok(Some(GroupSendTokens { combined, members }))
        })
        .await
        .map_err(map_tr_err)
}

/// Remove everything cached for the group. Returns the number of rows removed.
pub async fn delete_all(db: &Database, group_id: &GroupId) -> Result<usize, CourierError> {
    let group_id = group_id.0.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let members = tx.execute(
                "DELETE FROM group_send_member_tokens WHERE group_id = ?1",
                params![group_id],
            )?;
            let combined = tx.execute(
                "DELETE FROM group_send_combined_tokens WHERE group_id = ?1",
                params![group_id],
            )?;
            tx.commit()?;
            Ok(members + combined)
        })
        .await
        .map_err(map_tr_err)
}

/// Ids of every group with a cached combined token.
pub async fn list_groups(db: &Database) -> Result<Vec<GroupId>, CourierError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT group_id FROM group_send_combined_tokens ORDER BY group_id ASC",
            )?;
            let rows = stmt
                .query_map([], |row| Ok(GroupId(row.get(0)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemberToken> {
    Ok(MemberToken {
        group_id: GroupId(row.get(0)?),
        member_id: ServiceId(row.get(1)?),
        token: row.get(2)?,
        expires_at: from_millis(row.get(3)?),
    })
}
