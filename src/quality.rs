//! Additive quality heuristic used only to rank competing duplicates.

use crate::constants::RICH_DESCRIPTION_CHARS;
use crate::types::{CandidateEvent, StoredEvent};
use once_cell::sync::Lazy;
use regex::Regex;

/// Titles that start with a support keyword are usually a fragment of a bill.
static NOISE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:w/|(?:with|special\s+guests?|support(?:ing)?|opening|openers)\b)")
        .expect("valid noise prefix pattern")
});

/// The inputs the heuristic looks at, shared by candidates and stored rows.
pub trait QualitySignals {
    fn title(&self) -> &str;
    fn has_detail_url(&self) -> bool;
    fn has_ticket_url(&self) -> bool;
    fn has_artists(&self) -> bool;
    fn has_image(&self) -> bool;
    fn description_len(&self) -> usize;
    fn confidence(&self) -> f64;
}

fn present(url: &Option<String>) -> bool {
    url.as_deref().map_or(false, |u| !u.trim().is_empty())
}

impl QualitySignals for CandidateEvent {
    fn title(&self) -> &str {
        &self.title
    }
    fn has_detail_url(&self) -> bool {
        present(&self.detail_url)
    }
    fn has_ticket_url(&self) -> bool {
        present(&self.ticket_url)
    }
    fn has_artists(&self) -> bool {
        !self.artists.is_empty()
    }
    fn has_image(&self) -> bool {
        !self.images.is_empty()
    }
    fn description_len(&self) -> usize {
        self.description.as_deref().map_or(0, |d| d.chars().count())
    }
    fn confidence(&self) -> f64 {
        self.confidence
    }
}

impl QualitySignals for StoredEvent {
    fn title(&self) -> &str {
        &self.title
    }
    fn has_detail_url(&self) -> bool {
        present(&self.detail_url)
    }
    fn has_ticket_url(&self) -> bool {
        present(&self.ticket_url)
    }
    fn has_artists(&self) -> bool {
        !self.artists.is_empty()
    }
    fn has_image(&self) -> bool {
        !self.images.is_empty()
    }
    fn description_len(&self) -> usize {
        self.description.as_deref().map_or(0, |d| d.chars().count())
    }
    fn confidence(&self) -> f64 {
        self.confidence
    }
}

pub fn has_noise_prefix(title: &str) -> bool {
    NOISE_PREFIX.is_match(title)
}

pub fn quality_score<T: QualitySignals + ?Sized>(event: &T) -> i32 {
    let mut score = 0;
    if event.has_detail_url() {
        score += 3;
    }
    if event.has_ticket_url() {
        score += 2;
    }
    if event.has_artists() {
        score += 2;
    }
    if event.has_image() {
        score += 1;
    }
    if event.description_len() > RICH_DESCRIPTION_CHARS {
        score += 1;
    }
    score += (event.confidence().clamp(0.0, 1.0) * 2.0).floor() as i32;

    // Penalties
    if has_noise_prefix(event.title()) {
        score -= 3;
    }
    if !event.title().chars().any(char::is_lowercase) {
        score -= 1;
    }
    score
}
