//! Collapses near-duplicate candidates surfaced within one discovery pass.
//!
//! A paginated listing plus its detail pages commonly yields several phrasings of
//! one show. Candidates are grouped by venue, date, time and headliner; the best of
//! each group survives. Distinct headliners sharing one slot are co-billed shows and
//! survive when they score close to the slot winner.

use crate::constants::{CO_BILL_SCORE_WINDOW, DEFAULT_SLOT_TIME};
use crate::fingerprint::headliner;
use crate::quality::quality_score;
use crate::types::CandidateEvent;
use chrono::NaiveTime;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub kept: Vec<CandidateEvent>,
    pub dropped: usize,
}

pub fn time_key(time: Option<NaiveTime>) -> String {
    time.map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| DEFAULT_SLOT_TIME.to_string())
}

struct Ranked {
    index: usize,
    score: i32,
    title_len: usize,
    candidate: CandidateEvent,
}

impl Ranked {
    fn new(index: usize, candidate: CandidateEvent) -> Self {
        Self {
            index,
            score: quality_score(&candidate),
            title_len: candidate.title.chars().count(),
            candidate,
        }
    }
}

/// Best first: score, then longer title, then earlier in the batch.
fn rank(a: &Ranked, b: &Ranked) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.title_len.cmp(&a.title_len))
        .then_with(|| a.index.cmp(&b.index))
}

pub fn dedup_batch(candidates: Vec<CandidateEvent>) -> DedupOutcome {
    let total = candidates.len();

    // Step 1: group by venue, date, time and headliner
    let mut groups: BTreeMap<(String, String, String, String), Vec<Ranked>> = BTreeMap::new();
    for (index, candidate) in candidates.into_iter().enumerate() {
        let key = (
            candidate.venue_key(),
            candidate.start_date.to_string(),
            time_key(candidate.start_time),
            headliner(&candidate.title),
        );
        groups.entry(key).or_default().push(Ranked::new(index, candidate));
    }

    // Step 2: best of each group survives
    let mut slots: BTreeMap<(String, String, String), Vec<Ranked>> = BTreeMap::new();
    for ((venue, date, time, headliner_key), mut members) in groups {
        members.sort_by(rank);
        if members.len() > 1 {
            debug!(
                headliner = %headliner_key,
                date = %date,
                collapsed = members.len() - 1,
                "Collapsed same-headliner duplicates"
            );
        }
        let best = members.swap_remove(0);
        slots.entry((venue, date, time)).or_default().push(best);
    }

    // Step 3: distinct headliners in one slot survive only near the slot winner
    let mut kept: Vec<CandidateEvent> = Vec::new();
    for (_, mut members) in slots {
        members.sort_by(rank);
        let winner_score = members[0].score;
        for member in members {
            if member.score >= winner_score - CO_BILL_SCORE_WINDOW {
                kept.push(member.candidate);
            } else {
                debug!(title = %member.candidate.title, score = member.score, winner_score, "Dropped low-scoring slot competitor");
            }
        }
    }

    // Step 4: deterministic output order
    kept.sort_by(|a, b| {
        a.start_date
            .cmp(&b.start_date)
            .then_with(|| time_key(a.start_time).cmp(&time_key(b.start_time)))
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.venue_key().cmp(&b.venue_key()))
    });

    DedupOutcome {
        dropped: total - kept.len(),
        kept,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArtistCredit, EventPolicy, PriceRange, VenueRef};
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn candidate(title: &str, date: &str, time: Option<&str>) -> CandidateEvent {
        CandidateEvent {
            title: title.to_string(),
            start_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            start_time: time.map(|t| NaiveTime::parse_from_str(t, "%H:%M").unwrap()),
            end_date: None,
            end_time: None,
            venue: VenueRef::Name("The Hall".to_string()),
            description: None,
            category: None,
            tags: BTreeSet::new(),
            price: PriceRange::default(),
            source_url: None,
            ticket_url: None,
            detail_url: None,
            images: vec![],
            artists: vec![],
            confidence: 1.0,
            extraction_version: "v1".to_string(),
            policy: EventPolicy::default(),
            cancelled: false,
            source_name: "test".to_string(),
        }
    }

    fn titles(outcome: &DedupOutcome) -> Vec<&str> {
        outcome.kept.iter().map(|c| c.title.as_str()).collect()
    }

    #[test]
    fn test_support_variant_collapses_into_ticketed_listing() {
        let mut main = candidate("DJ Nova", "2026-03-01", Some("21:00"));
        main.ticket_url = Some("https://tix.example/nova".to_string());
        let fragment = candidate("with DJ Nova", "2026-03-01", Some("21:00"));

        let outcome = dedup_batch(vec![fragment, main]);
        assert_eq!(titles(&outcome), vec!["DJ Nova"]);
        assert_eq!(outcome.dropped, 1);
    }

    #[test]
    fn test_ties_prefer_longer_title_then_first_seen() {
        let short = candidate("Nova", "2026-03-01", Some("21:00"));
        let long = candidate("Nova, Echo", "2026-03-01", Some("21:00"));
        let outcome = dedup_batch(vec![short, long]);
        assert_eq!(titles(&outcome), vec!["Nova, Echo"]);

        let mut first = candidate("Nova", "2026-03-01", Some("21:00"));
        first.source_url = Some("https://a".to_string());
        let mut second = candidate("nova", "2026-03-01", Some("21:00"));
        second.source_url = Some("https://b".to_string());
        let outcome = dedup_batch(vec![first, second]);
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.kept[0].source_url.as_deref(), Some("https://a"));
    }

    #[test]
    fn test_missing_time_groups_with_midnight_default() {
        let a = candidate("Nova", "2026-03-01", None);
        let b = candidate("Nova", "2026-03-01", Some("00:00"));
        assert_eq!(dedup_batch(vec![a, b]).kept.len(), 1);

        let a = candidate("Nova", "2026-03-01", None);
        let b = candidate("Nova", "2026-03-01", Some("20:00"));
        assert_eq!(dedup_batch(vec![a, b]).kept.len(), 2);
    }

    #[test]
    fn test_co_billed_shows_within_window_survive() {
        let mut nova = candidate("Nova", "2026-03-01", Some("21:00"));
        nova.ticket_url = Some("https://tix/nova".to_string());
        let mut echo = candidate("Echo", "2026-03-01", Some("21:00"));
        echo.images = vec![crate::types::ImageRef { url: "https://img".to_string(), confidence: 1.0 }];

        // 4 vs 3: within one point, both survive
        let outcome = dedup_batch(vec![nova.clone(), echo]);
        assert_eq!(titles(&outcome), vec!["Echo", "Nova"]);

        // 4 vs 2: too far behind the slot winner
        let lumen = candidate("Lumen", "2026-03-01", Some("21:00"));
        let outcome = dedup_batch(vec![nova, lumen]);
        assert_eq!(titles(&outcome), vec!["Nova"]);
    }

    #[test]
    fn test_different_venues_never_collapse() {
        let a = candidate("Nova", "2026-03-01", Some("21:00"));
        let mut b = candidate("Nova", "2026-03-01", Some("21:00"));
        b.venue = VenueRef::Name("The Eastern".to_string());
        let mut c = candidate("Lumen", "2026-03-01", Some("21:00"));
        c.venue = VenueRef::Name("The Eastern".to_string());
        c.artists = vec![ArtistCredit { name: "Lumen".to_string(), role: None }];
        c.ticket_url = Some("https://tix".to_string());

        let outcome = dedup_batch(vec![a, b, c]);
        // Nova @ The Hall is alone in its slot; Nova @ The Eastern loses to Lumen by 4
        assert_eq!(titles(&outcome), vec!["Lumen", "Nova"]);
        assert_eq!(outcome.kept[1].venue_key(), "the hall");
    }

    #[test]
    fn test_output_sorted_by_date_time_title() {
        let outcome = dedup_batch(vec![
            candidate("Zed", "2026-03-02", Some("19:00")),
            candidate("Bravo", "2026-03-01", Some("22:00")),
            candidate("Alpha", "2026-03-01", Some("22:00")),
            candidate("Early", "2026-03-01", Some("18:00")),
        ]);
        assert_eq!(titles(&outcome), vec!["Early", "Alpha", "Bravo", "Zed"]);
    }

    #[test]
    fn test_empty_batch() {
        let outcome = dedup_batch(vec![]);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.dropped, 0);
    }
}
