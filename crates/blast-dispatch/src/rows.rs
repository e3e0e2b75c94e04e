//! Recipient row records and tolerant field pickers.
//!
//! Rows come from operator-uploaded spreadsheets, so field names vary in
//! case, spacing, and language. Pickers match normalized keys against a
//! fixed alias list in priority order.

use std::collections::BTreeMap;

use serde_json::Value;

/// One recipient row: arbitrary field names mapped to scalar values.
pub type RowRecord = BTreeMap<String, Value>;

const PHONE_FIELD_ALIASES: &[&str] = &["number", "nomor", "phone", "msisdn", "whatsapp", "wa"];
const NAME_FIELD_ALIASES: &[&str] = &["fullname", "name", "nama", "contactname", "recipientname"];

/// Returns the raw phone-like value from the first recognized alias field.
pub fn pick_phone_field(row: &RowRecord) -> Option<String> {
    pick_aliased_field(row, PHONE_FIELD_ALIASES)
}

/// Returns the recipient display name from the first recognized alias field.
pub fn pick_display_name(row: &RowRecord) -> Option<String> {
    pick_aliased_field(row, NAME_FIELD_ALIASES)
}

/// Renders a scalar field value the way an operator wrote it: strings
/// verbatim, numbers and bools via their display form, null as empty.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn pick_aliased_field(row: &RowRecord, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        for (key, value) in row {
            if normalize_field_key(key) != *alias {
                continue;
            }
            let text = scalar_to_string(value);
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

/// "Full Name" and "full_name" both match the `fullname` alias.
fn normalize_field_key(key: &str) -> String {
    key.chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '_')
        .collect::<String>()
        .to_lowercase()
}
