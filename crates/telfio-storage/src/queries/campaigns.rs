// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign and contact queries, including the atomic contact claim the
//! campaign runner paces dialing with.

use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::params;
use telfio_core::Result;
use telfio_core::traits::{CampaignRow, ContactCounts, ContactRow, ImportSummary, NewCampaign, NewContact};
use telfio_core::types::TerminalStatus;

use crate::database::{Database, map_tr_err, now_iso};

const CAMPAIGN_COLUMNS: &str = "id, name, description, prompt_id, status, max_concurrent, \
     total_contacts, completed_contacts, failed_contacts, created_at, updated_at, started_at, \
     completed_at";

const CONTACT_COLUMNS: &str = "id, campaign_id, phone_number, name, extra_data, status, call_id, \
     attempts, last_attempt_at, completed_at, error_message";

fn row_to_campaign(row: &rusqlite::Row) -> rusqlite::Result<CampaignRow> {
    Ok(CampaignRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        prompt_id: row.get(3)?,
        status: row.get(4)?,
        max_concurrent: row.get(5)?,
        total_contacts: row.get(6)?,
        completed_contacts: row.get(7)?,
        failed_contacts: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        started_at: row.get(11)?,
        completed_at: row.get(12)?,
    })
}

fn row_to_contact(row: &rusqlite::Row) -> rusqlite::Result<ContactRow> {
    Ok(ContactRow {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        phone_number: row.get(2)?,
        name: row.get(3)?,
        extra_data: row.get(4)?,
        status: row.get(5)?,
        call_id: row.get(6)?,
        attempts: row.get(7)?,
        last_attempt_at: row.get(8)?,
        completed_at: row.get(9)?,
        error_message: row.get(10)?,
    })
}

pub async fn create_campaign(db: &Database, campaign: &NewCampaign) -> Result<CampaignRow> {
    let campaign = campaign.clone();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO campaigns (name, description, prompt_id, status, max_concurrent, \
                 created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?5)",
                params![
                    campaign.name,
                    campaign.description,
                    campaign.prompt_id,
                    campaign.max_concurrent,
                    now,
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id],
                row_to_campaign,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_campaign(db: &Database, id: i64) -> Result<Option<CampaignRow>> {
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id],
                row_to_campaign,
            );
            match result {
                Ok(campaign) => Ok(Some(campaign)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_campaigns(db: &Database) -> Result<Vec<CampaignRow>> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map([], row_to_campaign)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn delete_campaign(db: &Database, id: i64) -> Result<bool> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute("DELETE FROM campaigns WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Sets campaign status, stamping `started_at` on first run and
/// `completed_at` on completion.
pub async fn set_campaign_status(db: &Database, id: i64, status: &str) -> Result<()> {
    let status = status.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE campaigns SET status = ?1, updated_at = ?2,
                     started_at = CASE
                         WHEN ?1 = 'running' AND started_at IS NULL THEN ?2
                         ELSE started_at END,
                     completed_at = CASE WHEN ?1 = 'completed' THEN ?2 ELSE completed_at END
                 WHERE id = ?3",
                params![status, now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Adds contacts in one transaction. Numbers already present in the
/// campaign are silently skipped and counted as duplicates.
pub async fn add_contacts(
    db: &Database,
    campaign_id: i64,
    contacts: &[NewContact],
) -> Result<ImportSummary> {
    let contacts = contacts.to_vec();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let mut imported = 0u64;
            let mut duplicates = 0u64;
            for contact in &contacts {
                let changed = tx.execute(
                    "INSERT INTO campaign_contacts (campaign_id, phone_number, name, extra_data)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(campaign_id, phone_number) DO NOTHING",
                    params![campaign_id, contact.phone_number, contact.name, contact.extra_data],
                )?;
                if changed > 0 {
                    imported += 1;
                } else {
                    duplicates += 1;
                }
            }
            tx.execute(
                "UPDATE campaigns SET total_contacts = total_contacts + ?1 WHERE id = ?2",
                params![imported as i64, campaign_id],
            )?;
            tx.commit()?;
            Ok(ImportSummary { imported, duplicates })
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_contacts(db: &Database, campaign_id: i64) -> Result<Vec<ContactRow>> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONTACT_COLUMNS} FROM campaign_contacts WHERE campaign_id = ?1
                 ORDER BY id ASC"
            ))?;
            let rows = stmt
                .query_map(params![campaign_id], row_to_contact)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically claims up to `limit` dialable pending contacts: marks them
/// "calling", bumps `attempts`, stamps `last_attempt_at`, and returns the
/// claimed rows. Retried contacts become dialable `retry_after_secs` after
/// their previous attempt.
pub async fn claim_pending_contacts(
    db: &Database,
    campaign_id: i64,
    limit: i64,
    retry_after_secs: i64,
) -> Result<Vec<ContactRow>> {
    if limit <= 0 {
        return Ok(Vec::new());
    }
    let cutoff = (Utc::now() - Duration::seconds(retry_after_secs))
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let ids: Vec<i64> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM campaign_contacts
                     WHERE campaign_id = ?1 AND status = 'pending'
                       AND (last_attempt_at IS NULL OR last_attempt_at <= ?2)
                     ORDER BY id ASC LIMIT ?3",
                )?;
                stmt.query_map(params![campaign_id, cutoff, limit], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };

            let mut claimed = Vec::with_capacity(ids.len());
            for id in &ids {
                tx.execute(
                    "UPDATE campaign_contacts
                     SET status = 'calling', attempts = attempts + 1, last_attempt_at = ?1
                     WHERE id = ?2",
                    params![now, id],
                )?;
                let contact = tx.query_row(
                    &format!("SELECT {CONTACT_COLUMNS} FROM campaign_contacts WHERE id = ?1"),
                    params![id],
                    row_to_contact,
                )?;
                claimed.push(contact);
            }
            tx.commit()?;
            Ok(claimed)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn bind_contact_call(db: &Database, contact_id: i64, call_id: &str) -> Result<()> {
    let call_id = call_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE campaign_contacts SET call_id = ?1 WHERE id = ?2",
                params![call_id, contact_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Terminal contact update.
pub async fn finish_contact(
    db: &Database,
    contact_id: i64,
    status: TerminalStatus,
    error: Option<&str>,
) -> Result<()> {
    let status = status.to_string();
    let error = error.map(str::to_string);
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE campaign_contacts
                 SET status = ?1, completed_at = ?2, error_message = ?3
                 WHERE id = ?4",
                params![status, now, error, contact_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Returns a connect-failed contact to the pending pool for a later retry.
pub async fn requeue_contact(db: &Database, contact_id: i64, error: &str) -> Result<()> {
    let error = error.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE campaign_contacts
                 SET status = 'pending', call_id = NULL, error_message = ?1
                 WHERE id = ?2",
                params![error, contact_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn campaign_counts(db: &Database, campaign_id: i64) -> Result<ContactCounts> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM campaign_contacts
                 WHERE campaign_id = ?1 GROUP BY status",
            )?;
            let mut counts = ContactCounts::default();
            let rows = stmt.query_map(params![campaign_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                counts.total += count;
                match status.as_str() {
                    "pending" => counts.pending = count,
                    "calling" => counts.calling = count,
                    "completed" => counts.completed = count,
                    "failed" => counts.failed = count,
                    _ => {}
                }
            }
            Ok(counts)
        })
        .await
        .map_err(map_tr_err)
}

/// Rolls contact counts up into the campaign stats columns.
pub async fn refresh_campaign_stats(db: &Database, campaign_id: i64) -> Result<()> {
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE campaigns SET
                     completed_contacts = (SELECT COUNT(*) FROM campaign_contacts
                         WHERE campaign_id = ?1 AND status = 'completed'),
                     failed_contacts = (SELECT COUNT(*) FROM campaign_contacts
                         WHERE campaign_id = ?1 AND status = 'failed'),
                     updated_at = ?2
                 WHERE id = ?1",
                params![campaign_id, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
