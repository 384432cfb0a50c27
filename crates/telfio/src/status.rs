// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `telfio status` command: queries a running instance.

use std::time::Duration;

/// Prints health and active-call information. Returns the process exit code.
pub async fn run_status(base_url: &str) -> i32 {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };
    let base_url = base_url.trim_end_matches('/');

    let health: serde_json::Value = match fetch(&client, &format!("{base_url}/health")).await {
        Ok(health) => health,
        Err(e) => {
            eprintln!("telfio unreachable at {base_url}: {e}");
            return 1;
        }
    };

    println!("status:       {}", health["status"].as_str().unwrap_or("unknown"));
    println!("uptime:       {}s", health["uptime_seconds"].as_u64().unwrap_or(0));
    println!("active calls: {}", health["active_calls"].as_u64().unwrap_or(0));

    match fetch(&client, &format!("{base_url}/calls/active")).await {
        Ok(active) => {
            if let Some(calls) = active["calls"].as_array() {
                for call in calls {
                    println!(
                        "  {}  {}  {}  since {}",
                        call["call_id"].as_str().unwrap_or("?"),
                        call["direction"].as_str().unwrap_or("?"),
                        call["state"].as_str().unwrap_or("?"),
                        call["started_at"].as_str().unwrap_or("?"),
                    );
                }
            }
            0
        }
        Err(e) => {
            eprintln!("warning: could not list active calls: {e}");
            0
        }
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<serde_json::Value, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }
    response.json().await.map_err(|e| e.to_string())
}
