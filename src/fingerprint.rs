//! Content fingerprints and headliner keys.
//!
//! `content_hash` is the primary duplicate key of the catalog. Two candidates that
//! describe the same event must produce the same hash once title and venue are
//! normalized, independent of locale or wall clock.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Support/feature keyword at the very start of a title ("with DJ Nova").
static LEADING_SUPPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:w/\s*|(?:with|feat\.?|featuring|ft\.|support(?:ing)?|special\s+guests?|open(?:ing|ers))(?:\b|\s)[\s:,\-]*)",
    )
    .expect("valid leading support pattern")
});

/// First delimiter that separates a headliner from the rest of the bill.
static BILL_DELIMITER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i),|\s+(?:w/|with\b|feat\.|feat\b|featuring\b|ft\.|support(?:ing)?\b|special\s+guests?\b|open(?:ing|ers)\b)",
    )
    .expect("valid bill delimiter pattern")
});

/// Lowercase, keep alphanumerics and whitespace, collapse whitespace runs.
///
/// `&` is read as "and" so "Nova & Echo" and "Nova and Echo" agree.
pub fn normalize_text(input: &str) -> String {
    let lowered = input.to_lowercase().replace('&', " and ");
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable digest of normalized (title, venue, date).
pub fn content_hash(title: &str, venue_name: &str, date: NaiveDate) -> String {
    let canonical = format!(
        "{}|{}|{}",
        normalize_text(title),
        normalize_text(venue_name),
        date.format("%Y-%m-%d")
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Normalized headliner of a title: the first bill segment with support keywords removed.
///
/// Falls back to the whole normalized title when stripping leaves nothing.
pub fn headliner(title: &str) -> String {
    let stripped = LEADING_SUPPORT.replace(title, "");
    let segment = match BILL_DELIMITER.find(&stripped) {
        Some(m) => &stripped[..m.start()],
        None => &stripped[..],
    };

    let key = normalize_text(segment);
    if key.is_empty() {
        normalize_text(title)
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_normalize_text_rules() {
        assert_eq!(normalize_text("  DJ   Nova!! "), "dj nova");
        assert_eq!(normalize_text("Nova & Echo"), "nova and echo");
        assert_eq!(normalize_text("Nova and Echo"), "nova and echo");
        assert_eq!(normalize_text("AC/DC: Live"), "acdc live");
        assert_eq!(normalize_text("Café\tTacvba"), "café tacvba");
        assert_eq!(normalize_text("---"), "");
    }

    #[test]
    fn test_equal_normalized_inputs_hash_identically() {
        let d = date("2026-03-01");
        let variants = [
            ("dj nova", "the hall"),
            ("DJ NOVA!", "  The   Hall "),
            ("DJ  Nova.", "The Hall."),
            ("\"DJ Nova\"", "THE HALL"),
            ("DJ Nova ", "The Hall"),
        ];
        let expected = content_hash("DJ Nova", "The Hall", d);
        for (title, venue) in variants {
            assert_eq!(content_hash(title, venue, d), expected, "{title} @ {venue}");
        }
    }

    #[test]
    fn test_joining_punctuation_is_dropped_not_spaced() {
        let d = date("2026-03-01");
        assert_eq!(
            content_hash("Nova-Echo", "The Hall", d),
            content_hash("NovaEcho", "The Hall", d)
        );
        assert_ne!(
            content_hash("Nova-Echo", "The Hall", d),
            content_hash("Nova Echo", "The Hall", d)
        );
    }

    #[test]
    fn test_hash_distinguishes_each_component() {
        let base = content_hash("DJ Nova", "The Hall", date("2026-03-01"));
        assert_ne!(base, content_hash("DJ Nova II", "The Hall", date("2026-03-01")));
        assert_ne!(base, content_hash("DJ Nova", "The Eastern", date("2026-03-01")));
        assert_ne!(base, content_hash("DJ Nova", "The Hall", date("2026-03-02")));
        assert_ne!(base, content_hash("DJ Nova", "", date("2026-03-01")));
    }

    #[test]
    fn test_hash_is_deterministic_hex_sha256() {
        let a = content_hash("Echo", "", date("2026-04-10"));
        let b = content_hash("Echo", "", date("2026-04-10"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_component_boundaries_do_not_collide() {
        let d = date("2026-04-10");
        assert_ne!(content_hash("a b", "c", d), content_hash("a", "b c", d));
    }

    #[test]
    fn test_headliner_strips_support_keywords() {
        assert_eq!(headliner("DJ Nova"), "dj nova");
        assert_eq!(headliner("with DJ Nova"), "dj nova");
        assert_eq!(headliner("w/ DJ Nova"), "dj nova");
        assert_eq!(headliner("Special Guests: DJ Nova"), "dj nova");
        assert_eq!(headliner("DJ Nova, Echo, Lumen"), "dj nova");
        assert_eq!(headliner("DJ Nova with Echo"), "dj nova");
        assert_eq!(headliner("DJ Nova w/ Echo"), "dj nova");
        assert_eq!(headliner("DJ Nova feat. Echo"), "dj nova");
        assert_eq!(headliner("DJ Nova featuring Echo"), "dj nova");
        assert_eq!(headliner("DJ Nova supporting Echo"), "dj nova");
        assert_eq!(headliner("DJ Nova special guest Echo"), "dj nova");
        assert_eq!(headliner("DJ Nova openers Echo"), "dj nova");
    }

    #[test]
    fn test_headliner_keeps_words_that_only_contain_keywords() {
        assert_eq!(headliner("Withered Hand"), "withered hand");
        assert_eq!(headliner("Openhouse"), "openhouse");
        assert_eq!(headliner("Nova & Echo"), "nova and echo");
    }

    #[test]
    fn test_headliner_falls_back_to_title() {
        assert_eq!(headliner("With"), "with");
        assert_eq!(headliner(", Nova"), "nova");
    }
}
