// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Control API tests over real HTTP.

mod common;

use std::time::Duration;

use common::spawn_gateway;

#[tokio::test]
async fn prompt_crud_and_activation() {
    let gateway = spawn_gateway(Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    // Validation failure: temperature out of range.
    let bad = client
        .post(format!("{}/prompts", gateway.base_url))
        .json(&serde_json::json!({
            "name": "ruim",
            "system_prompt": "x",
            "voice_id": "pt-BR-isadora",
            "llm_model": "gpt-4.1-nano",
            "temperature": 5.0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    // Create two prompts.
    let mut ids = Vec::new();
    for name in ["vendas", "suporte"] {
        let response = client
            .post(format!("{}/prompts", gateway.base_url))
            .json(&serde_json::json!({
                "name": name,
                "system_prompt": "Atenda bem.",
                "voice_id": "pt-BR-isadora",
                "llm_model": "gpt-4.1-nano",
                "temperature": 0.7,
                "greeting_text": "Olá!"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        let body: serde_json::Value = response.json().await.unwrap();
        ids.push(body["id"].as_i64().unwrap());
    }

    // Activate the second; exactly one active afterwards.
    let response = client
        .post(format!("{}/prompts/{}/activate", gateway.base_url, ids[1]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let list: Vec<serde_json::Value> = client
        .get(format!("{}/prompts", gateway.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let active: Vec<_> = list
        .iter()
        .filter(|p| p["is_active"].as_bool().unwrap_or(false))
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["id"].as_i64().unwrap(), ids[1]);

    // Missing prompt is 404.
    let missing = client
        .get(format!("{}/prompts/9999", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    gateway.cancel.cancel();
}

#[tokio::test]
async fn campaign_csv_import_reports_duplicates() {
    let gateway = spawn_gateway(Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    // Cap outside 1..=50 is invalid.
    let bad = client
        .post(format!("{}/campaigns", gateway.base_url))
        .json(&serde_json::json!({ "name": "x", "max_concurrent": 100 }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    let campaign: serde_json::Value = client
        .post(format!("{}/campaigns", gateway.base_url))
        .json(&serde_json::json!({ "name": "carga", "max_concurrent": 2 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = campaign["id"].as_i64().unwrap();

    let csv = "phone_number,name\n11999990001,Maria\n11999990002,João\n";
    let first: serde_json::Value = client
        .post(format!("{}/campaigns/{id}/contacts", gateway.base_url))
        .body(csv.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["imported"], 2);
    assert_eq!(first["duplicates"], 0);

    // Re-importing the same list imports nothing.
    let again: serde_json::Value = client
        .post(format!("{}/campaigns/{id}/contacts", gateway.base_url))
        .body(csv.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["imported"], 0);
    assert_eq!(again["duplicates"], 2);

    let detail: serde_json::Value = client
        .get(format!("{}/campaigns/{id}", gateway.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["contacts"]["total"], 2);
    assert_eq!(detail["campaign"]["total_contacts"], 2);

    // Pausing a non-running campaign conflicts.
    let pause = client
        .post(format!("{}/campaigns/{id}/pause", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(pause.status(), 409);

    gateway.cancel.cancel();
}

#[tokio::test]
async fn schedule_lifecycle_and_cancel_conflict() {
    let gateway = spawn_gateway(Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    let bad_time = client
        .post(format!("{}/schedules", gateway.base_url))
        .json(&serde_json::json!({
            "phone_number": "11999990000",
            "scheduled_time": "amanhã"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_time.status(), 400);

    let created: serde_json::Value = client
        .post(format!("{}/schedules", gateway.base_url))
        .json(&serde_json::json!({
            "phone_number": "11999990000",
            "scheduled_time": "2099-01-01T12:00:00Z"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["status"], "pending");

    let cancel = client
        .post(format!("{}/schedules/{id}/cancel", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(cancel.status(), 200);

    // Second cancel: state conflict.
    let again = client
        .post(format!("{}/schedules/{id}/cancel", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);

    gateway.cancel.cancel();
}

#[tokio::test]
async fn settings_are_masked_and_reloadable() {
    let gateway = spawn_gateway(Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    let set = client
        .put(format!("{}/settings", gateway.base_url))
        .json(&serde_json::json!({
            "key": "llm_api_key",
            "value": "sk-super-secret-9876",
            "is_secret": true
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(set.status(), 200);

    let list: serde_json::Value = client
        .get(format!("{}/settings", gateway.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let row = &list["settings"][0];
    assert_eq!(row["key"], "llm_api_key");
    let masked = row["value"].as_str().unwrap();
    assert!(masked.ends_with("9876"));
    assert!(!masked.contains("super-secret"));
    assert_eq!(row["is_configured"], true);

    let reload = client
        .post(format!("{}/settings/reload", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(reload.status(), 200);

    gateway.cancel.cancel();
}

#[tokio::test]
async fn dial_creates_pending_call_and_hangup_works() {
    let gateway = spawn_gateway(Duration::from_secs(5)).await;
    let client = reqwest::Client::new();

    let bad = client
        .post(format!("{}/calls/dial", gateway.base_url))
        .json(&serde_json::json!({ "number": "123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    let response = client
        .post(format!("{}/calls/dial", gateway.base_url))
        .json(&serde_json::json!({ "number": "11999990000" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    let call_id = body["call_id"].as_str().unwrap().to_string();

    let active: serde_json::Value = client
        .get(format!("{}/calls/active", gateway.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(active["count"], 1);
    assert_eq!(active["calls"][0]["call_id"], call_id.as_str());

    // Deleting a live call conflicts.
    let delete = client
        .delete(format!("{}/calls/{call_id}", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), 409);

    let hangup = client
        .post(format!("{}/calls/{call_id}/hangup", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(hangup.status(), 200);

    // Hanging up an unknown call is 404.
    let missing = client
        .post(format!("{}/calls/nope/hangup", gateway.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    gateway.cancel.cancel();
}
