//! Bracket-token template rendering with passthrough on missing fields.

use crate::rows::{scalar_to_string, RowRecord};

/// Renders `[token]` placeholders against a row's fields.
///
/// Lookup is case-insensitive. A token with no matching non-empty field is
/// left literally in place so the gap is visible to the operator in the
/// delivered text and the logs. The result is trimmed. Never fails.
pub fn render_template(template: &str, row: &RowRecord) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('[') {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        match token_end(after_open) {
            Some(close) => {
                let token = &after_open[..close];
                match lookup_field(row, token) {
                    Some(value) if !value.is_empty() => output.push_str(&value),
                    _ => {
                        output.push('[');
                        output.push_str(token);
                        output.push(']');
                    }
                }
                rest = &after_open[close + 1..];
            }
            None => {
                // Not a well-formed token; keep the bracket literal.
                output.push('[');
                rest = after_open;
            }
        }
    }
    output.push_str(rest);
    output.trim().to_string()
}

/// Finds the closing bracket of a `[a-zA-Z0-9_]+` token, if this is one.
fn token_end(after_open: &str) -> Option<usize> {
    let close = after_open.find(']')?;
    if close == 0 {
        return None;
    }
    after_open[..close]
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        .then_some(close)
}

fn lookup_field(row: &RowRecord, token: &str) -> Option<String> {
    let wanted = token.to_lowercase();
    row.iter()
        .find(|(key, _)| key.to_lowercase() == wanted)
        .map(|(_, value)| scalar_to_string(value))
}
