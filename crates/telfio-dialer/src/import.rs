// SPDX-FileCopyrightText: 2026 Telfio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CSV contact import.
//!
//! The header row is required. `phone_number` (or a common alias) is the
//! only mandatory column; `name` is recognized, and every other column is
//! preserved as contact metadata JSON.

use std::collections::BTreeMap;

use telfio_core::traits::NewContact;
use telfio_core::{Result, TelfioError};

const PHONE_COLUMNS: &[&str] = &["phone_number", "phone", "telefone", "numero", "number"];
const NAME_COLUMNS: &[&str] = &["name", "nome", "cliente", "contact"];

/// Parses CSV text into importable contacts.
///
/// Rows without a usable phone number (fewer than 10 digits) are skipped.
pub fn parse_contacts(csv_content: &str) -> Result<Vec<NewContact>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(csv_content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| TelfioError::Invalid(format!("CSV header missing or malformed: {e}")))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let phone_idx = headers
        .iter()
        .position(|h| PHONE_COLUMNS.contains(&h.as_str()))
        .ok_or_else(|| {
            TelfioError::Invalid("CSV must have a phone_number column".to_string())
        })?;
    let name_idx = headers.iter().position(|h| NAME_COLUMNS.contains(&h.as_str()));

    let mut contacts = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| TelfioError::Invalid(format!("CSV row malformed: {e}")))?;

        let raw_phone = record.get(phone_idx).unwrap_or("");
        let phone: String = raw_phone.chars().filter(|c| c.is_ascii_digit()).collect();
        if phone.len() < 10 {
            continue;
        }

        let name = name_idx
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        let mut extra = BTreeMap::new();
        for (idx, header) in headers.iter().enumerate() {
            if idx == phone_idx || Some(idx) == name_idx {
                continue;
            }
            if let Some(value) = record.get(idx)
                && !value.trim().is_empty()
            {
                extra.insert(header.clone(), value.trim().to_string());
            }
        }
        let extra_data = if extra.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&extra).unwrap_or_else(|_| "{}".to_string()))
        };

        contacts.push(NewContact {
            phone_number: phone,
            name,
            extra_data,
        });
    }

    Ok(contacts)
}
