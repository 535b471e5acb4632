//! Ordered artist lineups.

use crate::fingerprint::{headliner, normalize_text};
use crate::types::{ArtistCredit, EventArtist};

/// Dedupe by normalized name keeping first occurrence, number billing from 1 and
/// flag the headliner. Order is never changed.
fn finalize(title: &str, entries: Vec<(String, Option<String>)>) -> Vec<EventArtist> {
    let mut seen: Vec<String> = Vec::new();
    let mut lineup: Vec<EventArtist> = Vec::new();
    for (name, role) in entries {
        let key = normalize_text(&name);
        if key.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        lineup.push(EventArtist {
            name,
            role,
            billing_order: lineup.len() as u32 + 1,
            is_headliner: false,
        });
    }

    let title_headliner = headliner(title);
    let headliner_index = seen.iter().position(|k| *k == title_headliner).unwrap_or(0);
    if let Some(artist) = lineup.get_mut(headliner_index) {
        artist.is_headliner = true;
    }
    lineup
}

pub fn lineup_from_credits(title: &str, credits: &[ArtistCredit]) -> Vec<EventArtist> {
    finalize(
        title,
        credits
            .iter()
            .map(|c| (c.name.trim().to_string(), c.role.clone()))
            .collect(),
    )
}

/// Concatenate lineups in the given order and re-finalize against `title`.
pub fn merge_lineups<'a, I>(title: &str, lineups: I) -> Vec<EventArtist>
where
    I: IntoIterator<Item = &'a [EventArtist]>,
{
    let entries = lineups
        .into_iter()
        .flat_map(|l| l.iter().map(|a| (a.name.clone(), a.role.clone())))
        .collect();
    finalize(title, entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credit(name: &str) -> ArtistCredit {
        ArtistCredit {
            name: name.to_string(),
            role: None,
        }
    }

    fn names(lineup: &[EventArtist]) -> Vec<&str> {
        lineup.iter().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn test_headliner_follows_title() {
        let lineup = lineup_from_credits("Echo w/ Nova", &[credit("Nova"), credit("Echo")]);
        assert_eq!(names(&lineup), vec!["Nova", "Echo"]);
        assert!(!lineup[0].is_headliner);
        assert!(lineup[1].is_headliner);
        assert_eq!(lineup[1].billing_order, 2);
    }

    #[test]
    fn test_first_artist_headlines_without_title_match() {
        let lineup = lineup_from_credits("Friday Night Live", &[credit("Nova"), credit("Echo")]);
        assert!(lineup[0].is_headliner);
        assert!(!lineup[1].is_headliner);
    }

    #[test]
    fn test_merge_dedupes_by_normalized_name() {
        let a = lineup_from_credits("Nova", &[credit("Nova")]);
        let b = lineup_from_credits("Nova", &[credit("NOVA"), credit("Echo")]);
        let empty: Vec<EventArtist> = vec![];
        let merged = merge_lineups("Nova", [a.as_slice(), b.as_slice(), empty.as_slice()]);
        assert_eq!(names(&merged), vec!["Nova", "Echo"]);
        assert_eq!(
            merged.iter().map(|a| a.billing_order).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(merged[0].is_headliner);
    }

    #[test]
    fn test_blank_names_skipped() {
        let lineup = lineup_from_credits("Nova", &[credit("  "), credit("Nova")]);
        assert_eq!(names(&lineup), vec!["Nova"]);
        assert_eq!(lineup[0].billing_order, 1);
    }
}
