// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Settings key/value queries.

use rusqlite::params;
use telfio_core::Result;
use telfio_core::traits::SettingRow;

use crate::database::{Database, map_tr_err, now_iso};

fn row_to_setting(row: &rusqlite::Row) -> rusqlite::Result<SettingRow> {
    Ok(SettingRow {
        key: row.get(0)?,
        value: row.get(1)?,
        description: row.get(2)?,
        is_secret: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

pub async fn get_setting(db: &Database, key: &str) -> Result<Option<SettingRow>> {
    let key = key.to_string();
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                "SELECT key, value, description, is_secret, updated_at FROM settings WHERE key = ?1",
                params![key],
                row_to_setting,
            );
            match result {
                Ok(setting) => Ok(Some(setting)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Upsert preserving the description when the caller passes none.
pub async fn set_setting(
    db: &Database,
    key: &str,
    value: &str,
    description: Option<&str>,
    is_secret: bool,
) -> Result<()> {
    let key = key.to_string();
    let value = value.to_string();
    let description = description.map(str::to_string);
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value, description, is_secret, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     description = COALESCE(excluded.description, settings.description),
                     is_secret = excluded.is_secret,
                     updated_at = excluded.updated_at",
                params![key, value, description, is_secret, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_settings(db: &Database) -> Result<Vec<SettingRow>> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, description, is_secret, updated_at
                 FROM settings ORDER BY key ASC",
            )?;
            let rows = stmt
                .query_map([], row_to_setting)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}
