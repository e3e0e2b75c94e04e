//! Recipient normalization into canonical country-code-prefixed digit form.

/// Country code substituted for a single leading `0`.
pub const DEFAULT_COUNTRY_CODE: &str = "62";

const MIN_NATIONAL_DIGITS: usize = 6;

/// Normalizes a raw phone-like string into a canonical identifier, or
/// `None` when the input is not addressable.
///
/// Everything but digits and a leading `+` is stripped; the `+` is dropped;
/// a single leading `0` becomes `default_country_code`. The result is
/// accepted only as `country code` + at least six further digits. Pure and
/// idempotent: feeding an accepted output back in returns it unchanged.
pub fn normalize_recipient(raw: &str, default_country_code: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '+')
        .collect();
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    // A plus anywhere but the front was garbage in the input.
    if cleaned.is_empty() || cleaned.contains('+') {
        return None;
    }
    let candidate = match cleaned.strip_prefix('0') {
        Some(rest) => format!("{default_country_code}{rest}"),
        None => cleaned.to_string(),
    };
    let national = candidate.strip_prefix(default_country_code)?;
    if national.len() < MIN_NATIONAL_DIGITS {
        return None;
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(raw: &str) -> Option<String> {
        normalize_recipient(raw, DEFAULT_COUNTRY_CODE)
    }

    #[test]
    fn unit_leading_zero_becomes_country_code() {
        assert_eq!(
            normalize("0812-3456-7890").as_deref(),
            Some("6281234567890")
        );
    }

    #[test]
    fn unit_plus_prefix_is_dropped() {
        assert_eq!(
            normalize("+62 812 3456 7890").as_deref(),
            Some("6281234567890")
        );
    }

    #[test]
    fn unit_canonical_input_is_unchanged() {
        let first = normalize("0812-3456-7890").expect("accepted");
        assert_eq!(normalize(&first).as_deref(), Some(first.as_str()));
    }

    #[test]
    fn unit_rejections() {
        assert_eq!(normalize("abc"), None);
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("+"), None);
        // Too short after the country code.
        assert_eq!(normalize("0812"), None);
        // Wrong country code.
        assert_eq!(normalize("15551230000"), None);
        // Stray plus in the middle survives cleaning and poisons the number.
        assert_eq!(normalize("08+123456789"), None);
    }

    #[test]
    fn unit_minimum_length_boundary() {
        assert_eq!(normalize("62123456").as_deref(), Some("62123456"));
        assert_eq!(normalize("6212345"), None);
    }
}
