// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prompt CRUD and the atomic activation swap.

use rusqlite::params;
use telfio_core::Result;
use telfio_core::traits::{NewPrompt, PromptRow};

use crate::database::{Database, map_tr_err, now_iso};

const PROMPT_COLUMNS: &str = "id, name, description, system_prompt, voice_id, llm_model, \
     temperature, greeting_text, greeting_duration_ms, is_active, created_at, updated_at";

fn row_to_prompt(row: &rusqlite::Row) -> rusqlite::Result<PromptRow> {
    Ok(PromptRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        system_prompt: row.get(3)?,
        voice_id: row.get(4)?,
        llm_model: row.get(5)?,
        temperature: row.get(6)?,
        greeting_text: row.get(7)?,
        greeting_duration_ms: row.get(8)?,
        is_active: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

pub async fn create_prompt(db: &Database, prompt: &NewPrompt) -> Result<PromptRow> {
    let prompt = prompt.clone();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO prompts (name, description, system_prompt, voice_id, llm_model, \
                 temperature, greeting_text, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)",
                params![
                    prompt.name,
                    prompt.description,
                    prompt.system_prompt,
                    prompt.voice_id,
                    prompt.llm_model,
                    prompt.temperature,
                    prompt.greeting_text,
                    now,
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {PROMPT_COLUMNS} FROM prompts WHERE id = ?1"),
                params![id],
                row_to_prompt,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn update_prompt(db: &Database, id: i64, prompt: &NewPrompt) -> Result<Option<PromptRow>> {
    let prompt = prompt.clone();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE prompts SET name = ?1, description = ?2, system_prompt = ?3, \
                 voice_id = ?4, llm_model = ?5, temperature = ?6, greeting_text = ?7, \
                 greeting_duration_ms = NULL, updated_at = ?8
                 WHERE id = ?9",
                params![
                    prompt.name,
                    prompt.description,
                    prompt.system_prompt,
                    prompt.voice_id,
                    prompt.llm_model,
                    prompt.temperature,
                    prompt.greeting_text,
                    now,
                    id,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            conn.query_row(
                &format!("SELECT {PROMPT_COLUMNS} FROM prompts WHERE id = ?1"),
                params![id],
                row_to_prompt,
            )
            .map(Some)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_prompt(db: &Database, id: i64) -> Result<Option<PromptRow>> {
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!("SELECT {PROMPT_COLUMNS} FROM prompts WHERE id = ?1"),
                params![id],
                row_to_prompt,
            );
            match result {
                Ok(prompt) => Ok(Some(prompt)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_prompts(db: &Database) -> Result<Vec<PromptRow>> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROMPT_COLUMNS} FROM prompts ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map([], row_to_prompt)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn delete_prompt(db: &Database, id: i64) -> Result<bool> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute("DELETE FROM prompts WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Atomic swap: clears the current active flag and sets `id` active in one
/// transaction, so exactly one prompt is active at any time.
pub async fn activate_prompt(db: &Database, id: i64) -> Result<()> {
    let now = now_iso();
    let activated = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("UPDATE prompts SET is_active = 0 WHERE is_active = 1", [])?;
            let changed = tx.execute(
                "UPDATE prompts SET is_active = 1, updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            if changed == 0 {
                // Nothing to activate: leave the previous state untouched.
                return Ok(false);
            }
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(map_tr_err)?;

    if activated {
        Ok(())
    } else {
        Err(telfio_core::TelfioError::NotFound(format!("prompt {id}")))
    }
}

pub async fn active_prompt(db: &Database) -> Result<Option<PromptRow>> {
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!("SELECT {PROMPT_COLUMNS} FROM prompts WHERE is_active = 1 LIMIT 1"),
                [],
                row_to_prompt,
            );
            match result {
                Ok(prompt) => Ok(Some(prompt)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Caches the measured greeting synthesis duration.
pub async fn set_greeting_duration(db: &Database, id: i64, duration_ms: f64) -> Result<()> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE prompts SET greeting_duration_ms = ?1 WHERE id = ?2",
                params![duration_ms, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
