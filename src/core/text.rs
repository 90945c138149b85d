//! String cleanup for user-entered legacy data.

use regex::Regex;
use std::sync::LazyLock;

static EMAIL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\s<>,;:()\[\]]+@[^\s<>,;:()\[\]]+").unwrap());

static VALID_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$").unwrap()
});

static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Extract the first address-looking token, lowercased. Legacy email fields
/// often hold several addresses or a display name.
pub fn sanitize_email(raw: &str) -> String {
    EMAIL_TOKEN
        .find(raw)
        .map(|m| m.as_str().trim_matches('.').to_lowercase())
        .unwrap_or_else(|| raw.trim().to_lowercase())
}

pub fn is_valid_mail(email: &str) -> bool {
    VALID_EMAIL.is_match(email)
}

/// Strip markup and collapse whitespace in a single-line field.
pub fn sanitize_user_input(raw: &str) -> String {
    let stripped = TAGS.replace_all(raw, "");
    let cleaned: String = stripped
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();
    WHITESPACE.replace_all(cleaned.trim(), " ").into_owned()
}

/// Remove control characters but keep line structure.
pub fn strip_control_chars(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_sanitizing_takes_first_address() {
        assert_eq!(sanitize_email("Ada <ADA@Example.org>"), "ada@example.org");
        assert_eq!(sanitize_email("a@x.org; b@y.org"), "a@x.org");
        assert_eq!(sanitize_email("  nobody  "), "nobody");
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_mail("ada@example.org"));
        assert!(!is_valid_mail("ada@localhost"));
        assert!(!is_valid_mail("not an email"));
    }

    #[test]
    fn user_input_is_flattened() {
        assert_eq!(sanitize_user_input("  <b>Big</b>\n  Event\t"), "Big Event");
        assert_eq!(strip_control_chars("a\u{0}b\nc"), "ab\nc");
    }
}
