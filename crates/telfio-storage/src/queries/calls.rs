// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Call and transcript message queries.

use rusqlite::params;
use telfio_core::traits::{CallMessageRow, CallRow, NewCall};
use telfio_core::types::{TerminalStatus, TranscriptEntry};
use telfio_core::Result;

use crate::database::{Database, map_tr_err, now_iso};

const CALL_COLUMNS: &str = "id, call_id, switch_uuid, caller_number, called_number, prompt_id, \
     status, direction, start_time, answer_time, end_time, duration_seconds, summary, created_at";

fn row_to_call(row: &rusqlite::Row) -> rusqlite::Result<CallRow> {
    Ok(CallRow {
        id: row.get(0)?,
        call_id: row.get(1)?,
        switch_uuid: row.get(2)?,
        caller_number: row.get(3)?,
        called_number: row.get(4)?,
        prompt_id: row.get(5)?,
        status: row.get(6)?,
        direction: row.get(7)?,
        start_time: row.get(8)?,
        answer_time: row.get(9)?,
        end_time: row.get(10)?,
        duration_seconds: row.get(11)?,
        summary: row.get(12)?,
        created_at: row.get(13)?,
    })
}

/// Insert a call row. Idempotent on `call_id`.
pub async fn insert_call(db: &Database, call: &NewCall) -> Result<()> {
    let call = call.clone();
    let created_at = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO calls (call_id, switch_uuid, caller_number, called_number, \
                 prompt_id, status, direction, start_time, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8)
                 ON CONFLICT(call_id) DO NOTHING",
                params![
                    call.call_id,
                    call.switch_uuid,
                    call.caller_number,
                    call.called_number,
                    call.prompt_id,
                    call.direction,
                    call.start_time,
                    created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Mark a call active on switch connect.
pub async fn mark_call_active(
    db: &Database,
    call_id: &str,
    switch_uuid: Option<&str>,
    caller_number: Option<&str>,
    called_number: Option<&str>,
    answer_time: &str,
) -> Result<()> {
    let call_id = call_id.to_string();
    let switch_uuid = switch_uuid.map(str::to_string);
    let caller_number = caller_number.map(str::to_string);
    let called_number = called_number.map(str::to_string);
    let answer_time = answer_time.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE calls SET status = 'active',
                     switch_uuid = COALESCE(?1, switch_uuid),
                     caller_number = COALESCE(?2, caller_number),
                     called_number = COALESCE(?3, called_number),
                     answer_time = ?4
                 WHERE call_id = ?5",
                params![switch_uuid, caller_number, called_number, answer_time, call_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Append one committed transcript entry. Rowid order is commit order.
pub async fn append_message(db: &Database, call_id: &str, entry: &TranscriptEntry) -> Result<()> {
    let call_id = call_id.to_string();
    let role = entry.role.to_string();
    let content = entry.content.clone();
    let audio_ms = entry.audio_ms.map(|ms| ms as i64);
    let timestamp = entry.ts.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO call_messages (call_id, role, content, audio_duration_ms, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![call_id, role, content, audio_ms, timestamp],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Record the terminal outcome of a call.
pub async fn finalize_call(
    db: &Database,
    call_id: &str,
    outcome: TerminalStatus,
    end_time: &str,
    duration_seconds: f64,
    summary: Option<&str>,
) -> Result<()> {
    let call_id = call_id.to_string();
    let status = outcome.to_string();
    let end_time = end_time.to_string();
    let summary = summary.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE calls SET status = ?1, end_time = ?2, duration_seconds = ?3,
                     summary = COALESCE(?4, summary)
                 WHERE call_id = ?5",
                params![status, end_time, duration_seconds, summary, call_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Get a call by its public id.
pub async fn get_call(db: &Database, call_id: &str) -> Result<Option<CallRow>> {
    let call_id = call_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {CALL_COLUMNS} FROM calls WHERE call_id = ?1"))?;
            let result = stmt.query_row(params![call_id], row_to_call);
            match result {
                Ok(call) => Ok(Some(call)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Page through call history, newest first. Returns rows plus total count.
pub async fn list_calls(
    db: &Database,
    page: u32,
    per_page: u32,
    status: Option<&str>,
) -> Result<(Vec<CallRow>, u64)> {
    let status = status.map(str::to_string);
    let per_page = per_page.max(1);
    let offset = (page.max(1) - 1) * per_page;
    db.connection()
        .call(move |conn| {
            let (total, rows) = match &status {
                Some(status_filter) => {
                    let total: u64 = conn.query_row(
                        "SELECT COUNT(*) FROM calls WHERE status = ?1",
                        params![status_filter],
                        |row| row.get(0),
                    )?;
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {CALL_COLUMNS} FROM calls WHERE status = ?1
                         ORDER BY start_time DESC LIMIT ?2 OFFSET ?3"
                    ))?;
                    let mapped = stmt
                        .query_map(params![status_filter, per_page, offset], row_to_call)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    (total, mapped)
                }
                None => {
                    let total: u64 =
                        conn.query_row("SELECT COUNT(*) FROM calls", [], |row| row.get(0))?;
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {CALL_COLUMNS} FROM calls
                         ORDER BY start_time DESC LIMIT ?1 OFFSET ?2"
                    ))?;
                    let mapped = stmt
                        .query_map(params![per_page, offset], row_to_call)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    (total, mapped)
                }
            };
            Ok((rows, total))
        })
        .await
        .map_err(map_tr_err)
}

/// All transcript messages for a call, in commit order.
pub async fn get_messages(db: &Database, call_id: &str) -> Result<Vec<CallMessageRow>> {
    let call_id = call_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, call_id, role, content, audio_duration_ms, timestamp
                 FROM call_messages WHERE call_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![call_id], |row| {
                    Ok(CallMessageRow {
                        id: row.get(0)?,
                        call_id: row.get(1)?,
                        role: row.get(2)?,
                        content: row.get(3)?,
                        audio_duration_ms: row.get(4)?,
                        timestamp: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a call and (via cascade) its messages.
pub async fn delete_call(db: &Database, call_id: &str) -> Result<bool> {
    let call_id = call_id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute("DELETE FROM calls WHERE call_id = ?1", params![call_id])?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Startup recovery: in-memory sessions do not survive a restart, so any
/// call still marked pending/active belongs to a dead process.
pub async fn mark_stale_calls_failed(db: &Database) -> Result<u64> {
    let end_time = now_iso();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE calls SET status = 'failed', end_time = ?1
                 WHERE status IN ('pending', 'active')",
                params![end_time],
            )?;
            Ok(changed as u64)
        })
        .await
        .map_err(map_tr_err)
}
