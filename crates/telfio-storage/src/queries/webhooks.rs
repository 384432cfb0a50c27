// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook configuration and delivery log queries.
//!
//! Subscribed events are stored as a JSON array in a TEXT column; matching
//! against an event name happens after deserialization.

use rusqlite::params;
use telfio_core::Result;
use telfio_core::traits::{NewWebhookConfig, NewWebhookLog, WebhookConfigRow, WebhookLogRow};

use crate::database::{Database, map_tr_err, now_iso};

const CONFIG_COLUMNS: &str = "id, url, events, is_active, secret, created_at, updated_at";

fn row_to_config(row: &rusqlite::Row) -> rusqlite::Result<WebhookConfigRow> {
    let events_json: String = row.get(2)?;
    let events = serde_json::from_str(&events_json).unwrap_or_default();
    Ok(WebhookConfigRow {
        id: row.get(0)?,
        url: row.get(1)?,
        events,
        is_active: row.get(3)?,
        secret: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn events_json(events: &[String]) -> String {
    serde_json::to_string(events).unwrap_or_else(|_| "[]".to_string())
}

pub async fn create_webhook(db: &Database, config: &NewWebhookConfig) -> Result<WebhookConfigRow> {
    let config = config.clone();
    let events = events_json(&config.events);
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO webhook_configs (url, events, is_active, secret, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![config.url, events, config.is_active, config.secret, now],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {CONFIG_COLUMNS} FROM webhook_configs WHERE id = ?1"),
                params![id],
                row_to_config,
            )
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_webhook(db: &Database, id: i64) -> Result<Option<WebhookConfigRow>> {
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!("SELECT {CONFIG_COLUMNS} FROM webhook_configs WHERE id = ?1"),
                params![id],
                row_to_config,
            );
            match result {
                Ok(config) => Ok(Some(config)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_webhooks(db: &Database) -> Result<Vec<WebhookConfigRow>> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONFIG_COLUMNS} FROM webhook_configs ORDER BY id ASC"
            ))?;
            let rows = stmt
                .query_map([], row_to_config)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn update_webhook(
    db: &Database,
    id: i64,
    config: &NewWebhookConfig,
) -> Result<Option<WebhookConfigRow>> {
    let config = config.clone();
    let events = events_json(&config.events);
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE webhook_configs
                 SET url = ?1, events = ?2, is_active = ?3, secret = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![config.url, events, config.is_active, config.secret, now, id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            conn.query_row(
                &format!("SELECT {CONFIG_COLUMNS} FROM webhook_configs WHERE id = ?1"),
                params![id],
                row_to_config,
            )
            .map(Some)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn delete_webhook(db: &Database, id: i64) -> Result<bool> {
    db.connection()
        .call(move |conn| {
            let changed =
                conn.execute("DELETE FROM webhook_configs WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Active configurations subscribed to `event`.
pub async fn active_webhooks_for(db: &Database, event: &str) -> Result<Vec<WebhookConfigRow>> {
    let all = list_webhooks(db).await?;
    Ok(all
        .into_iter()
        .filter(|c| c.is_active && c.events.iter().any(|e| e == event))
        .collect())
}

pub async fn log_webhook_delivery(db: &Database, log: &NewWebhookLog) -> Result<()> {
    let log = log.clone();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO webhook_logs (config_id, event_type, payload, status_code, \
                 response_body, attempt, success, error_message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    log.config_id,
                    log.event_type,
                    log.payload,
                    log.status_code,
                    log.response_body,
                    log.attempt,
                    log.success,
                    log.error_message,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn list_webhook_logs(
    db: &Database,
    config_id: i64,
    limit: i64,
) -> Result<Vec<WebhookLogRow>> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, config_id, event_type, payload, status_code, response_body, \
                 attempt, success, error_message, created_at
                 FROM webhook_logs WHERE config_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![config_id, limit], |row| {
                    Ok(WebhookLogRow {
                        id: row.get(0)?,
                        config_id: row.get(1)?,
                        event_type: row.get(2)?,
                        payload: row.get(3)?,
                        status_code: row.get(4)?,
                        response_body: row.get(5)?,
                        attempt: row.get(6)?,
                        success: row.get(7)?,
                        error_message: row.get(8)?,
                        created_at: row.get(9)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn config_for(events: &[&str]) -> NewWebhookConfig {
        NewWebhookConfig {
            url: "https://example.com/hook".to_string(),
            events: events.iter().map(|e| e.to_string()).collect(),
            secret: Some("s3cret".to_string()),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn events_round_trip_as_json() {
        let (db, _dir) = setup_db().await;
        let created = create_webhook(&db, &config_for(&["call.started", "call.ended"]))
            .await
            .unwrap();
        assert_eq!(created.events, vec!["call.started", "call.ended"]);
        assert_eq!(created.secret.as_deref(), Some("s3cret"));
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn active_filter_matches_subscriptions() {
        let (db, _dir) = setup_db().await;
        create_webhook(&db, &config_for(&["call.ended"])).await.unwrap();
        let inactive = create_webhook(&db, &config_for(&["call.ended"])).await.unwrap();
        let mut off = config_for(&["call.ended"]);
        off.is_active = false;
        update_webhook(&db, inactive.id, &off).await.unwrap();

        let matching = active_webhooks_for(&db, "call.ended").await.unwrap();
        assert_eq!(matching.len(), 1);

        let none = active_webhooks_for(&db, "call.started").await.unwrap();
        assert!(none.is_empty());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn delivery_attempts_are_logged() {
        let (db, _dir) = setup_db().await;
        let config = create_webhook(&db, &config_for(&["call.ended"])).await.unwrap();

        for attempt in 1..=3 {
            log_webhook_delivery(
                &db,
                &NewWebhookLog {
                    config_id: config.id,
                    event_type: "call.ended".to_string(),
                    payload: "{}".to_string(),
                    status_code: Some(503),
                    response_body: None,
                    attempt,
                    success: false,
                    error_message: None,
                },
            )
            .await
            .unwrap();
        }

        let logs = list_webhook_logs(&db, config.id, 10).await.unwrap();
        assert_eq!(logs.len(), 3);
        // Newest first.
        assert_eq!(logs[0].attempt, 3);
        db.close().await.unwrap();
    }
}
