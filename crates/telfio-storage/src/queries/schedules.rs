// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduled call queries.

use rusqlite::params;
use telfio_core::Result;
use telfio_core::TelfioError;
use telfio_core::traits::{NewScheduledCall, ScheduledCallRow};
use telfio_core::types::TerminalStatus;

use crate::database::{Database, map_tr_err, now_iso};

const SCHEDULE_COLUMNS: &str =
    "id, phone_number, prompt_id, scheduled_time, status, call_id, notes, created_at, updated_at";

fn row_to_schedule(row: &rusqlite::Row) -> rusqlite::Result<ScheduledCallRow> {
    Ok(ScheduledCallRow {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        prompt_id: row.get(2)?,
        scheduled_time: row.get(3)?,
        status: row.get(4)?,
        call_id: row.get(5)?,
        notes: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub async fn create_scheduled_call(
    db: &Database,
    call: &NewScheduledCall,
) -> Result<ScheduledCallRow> {
    let call = call.clone();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO scheduled_calls (phone_number, prompt_id, scheduled_time, status, \
                 notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?5)",
                params![call.phone_number, call.prompt_id, call.scheduled_time, call.notes, now],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM scheduled_calls WHERE id = ?1"),
                params![id],
                row_to_schedule,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_scheduled_call(db: &Database, id: i64) -> Result<Option<ScheduledCallRow>> {
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM scheduled_calls WHERE id = ?1"),
                params![id],
                row_to_schedule,
            );
            match result {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_scheduled_calls(
    db: &Database,
    status: Option<&str>,
) -> Result<Vec<ScheduledCallRow>> {
    let status = status.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let mut rows = Vec::new();
            match &status {
                Some(status_filter) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {SCHEDULE_COLUMNS} FROM scheduled_calls WHERE status = ?1
                         ORDER BY scheduled_time ASC"
                    ))?;
                    let mapped = stmt.query_map(params![status_filter], row_to_schedule)?;
                    for row in mapped {
                        rows.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {SCHEDULE_COLUMNS} FROM scheduled_calls
                         ORDER BY scheduled_time ASC"
                    ))?;
                    let mapped = stmt.query_map([], row_to_schedule)?;
                    for row in mapped {
                        rows.push(row?);
                    }
                }
            }
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

/// Pending schedules due at or before `now` (fixed-width RFC 3339).
pub async fn due_scheduled_calls(db: &Database, now: &str) -> Result<Vec<ScheduledCallRow>> {
    let now = now.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM scheduled_calls
                 WHERE status = 'pending' AND scheduled_time <= ?1
                 ORDER BY scheduled_time ASC"
            ))?;
            let rows = stmt
                .query_map(params![now], row_to_schedule)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

/// Conditional pending → executing transition; false when already taken.
pub async fn mark_schedule_executing(db: &Database, id: i64) -> Result<bool> {
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE scheduled_calls SET status = 'executing', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![now, id],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn bind_schedule_call(db: &Database, id: i64, call_id: &str) -> Result<()> {
    let call_id = call_id.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE scheduled_calls SET call_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![call_id, now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn finish_schedule(db: &Database, id: i64, status: TerminalStatus) -> Result<()> {
    let status = status.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE scheduled_calls SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status, now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Cancels a schedule. Only `pending` rows may be cancelled.
pub async fn cancel_scheduled_call(db: &Database, id: i64) -> Result<()> {
    let now = now_iso();
    let changed = db
        .connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE scheduled_calls SET status = 'cancelled', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![now, id],
            )?;
            Ok(changed)
        })
        .await
        .map_err(map_tr_err)?;

    if changed > 0 {
        return Ok(());
    }
    match get_scheduled_call(db, id).await? {
        Some(row) => Err(TelfioError::Conflict(format!(
            "scheduled call {id} is {}, only pending may be cancelled",
            row.status
        ))),
        None => Err(TelfioError::NotFound(format!("scheduled call {id}"))),
    }
}
