// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `telfio doctor` command: configuration and environment checks.

use telfio_config::{RuntimeSettings, TelfioConfig, missing_provider_keys, validate_config};
use telfio_storage::SqliteStore;

/// Runs all checks and prints a report. Returns the process exit code.
pub async fn run_doctor(config: TelfioConfig) -> i32 {
    let mut failures = 0;

    // 1. Semantic config validation.
    let errors = validate_config(&config);
    if errors.is_empty() {
        println!("ok   configuration is valid");
    } else {
        for error in &errors {
            println!("FAIL {error}");
        }
        failures += errors.len();
    }

    // 2. Storage: open (runs migrations) and read back.
    match SqliteStore::open(&config.storage.database_path).await {
        Ok(store) => {
            println!("ok   database at {} opens and migrates", config.storage.database_path);

            // 3. Provider keys, after merging settings rows over the file.
            let settings = RuntimeSettings::new(config.clone());
            if let Err(e) = settings.reload(&store).await {
                println!("FAIL settings reload: {e}");
                failures += 1;
            } else {
                let snapshot = settings.current();
                for (name, key) in [
                    ("stt_api_key", &snapshot.stt_api_key),
                    ("llm_api_key", &snapshot.llm_api_key),
                    ("tts_api_key", &snapshot.tts_api_key),
                ] {
                    match key {
                        Some(_) => println!("ok   {name} configured"),
                        None => {
                            println!("FAIL {name} missing (set via config, env, or settings)");
                            failures += 1;
                        }
                    }
                }
                println!(
                    "ok   caps: {} concurrent calls, barge-in at {} chars",
                    snapshot.max_concurrent_calls, snapshot.barge_in_min_chars
                );
            }

            let _ = store.close().await;
        }
        Err(e) => {
            println!("FAIL database: {e}");
            failures += 1;

            // Still report keys knowable from the file alone.
            for name in missing_provider_keys(&config) {
                println!("FAIL {name} missing");
                failures += 1;
            }
        }
    }

    if failures == 0 {
        println!("\nall checks passed");
        0
    } else {
        println!("\n{failures} check(s) failed");
        1
    }
}
