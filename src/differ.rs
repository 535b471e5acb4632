//! Field-level diff between a stored event and a fresh candidate.
//!
//! Only fields the candidate actually carries are compared. A field the candidate
//! leaves out never clears stored data, so an unchanged rerun yields an empty patch.

use crate::constants::{
    FIELD_AGE_RESTRICTION, FIELD_CANCELLED, FIELD_DESCRIPTION, FIELD_DETAIL_URL, FIELD_END_DATE,
    FIELD_END_TIME, FIELD_PRICE_MAX, FIELD_PRICE_MIN, FIELD_PRICE_NOTE, FIELD_REENTRY,
    FIELD_SOURCE_URL, FIELD_START_TIME, FIELD_TICKET_STATUS, FIELD_TICKET_URL,
};
use crate::types::{
    AgeRestriction, CandidateEvent, FieldSource, PriceRange, StoredEvent, TicketStatus,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use std::fmt::Display;

/// Values to write onto a stored event; `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch {
    pub description: Option<String>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub end_date: Option<NaiveDate>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub price_note: Option<String>,
    pub source_url: Option<String>,
    pub ticket_url: Option<String>,
    pub detail_url: Option<String>,
    pub age_restriction: Option<AgeRestriction>,
    pub reentry_allowed: Option<bool>,
    pub ticket_status: Option<TicketStatus>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventDiff {
    pub patch: EventPatch,
    pub changes: Vec<String>,
    pub cancelled: bool,
}

impl EventDiff {
    pub fn is_empty(&self) -> bool {
        self.patch.is_empty() && self.changes.is_empty() && !self.cancelled
    }
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        *self == EventPatch::default()
    }

    /// Write the patched values, stamping provenance and confidence per field.
    pub fn apply(&self, event: &mut StoredEvent, origin: &FieldSource, confidence: f64) {
        if self.is_empty() {
            return;
        }

        if let Some(v) = &self.description {
            event.description = Some(v.clone());
            event.stamp(FIELD_DESCRIPTION, origin, confidence);
        }
        if let Some(v) = self.start_time {
            event.start_time = Some(v);
            event.stamp(FIELD_START_TIME, origin, confidence);
        }
        if let Some(v) = self.end_time {
            event.end_time = Some(v);
            event.stamp(FIELD_END_TIME, origin, confidence);
        }
        if let Some(v) = self.end_date {
            event.end_date = Some(v);
            event.stamp(FIELD_END_DATE, origin, confidence);
        }
        if let Some(v) = self.price_min {
            event.price.min = Some(v);
            event.stamp(FIELD_PRICE_MIN, origin, confidence);
        }
        if let Some(v) = self.price_max {
            event.price.max = Some(v);
            event.stamp(FIELD_PRICE_MAX, origin, confidence);
        }
        if let Some(v) = &self.price_note {
            event.price.note = Some(v.clone());
            event.stamp(FIELD_PRICE_NOTE, origin, confidence);
        }
        if let Some(v) = &self.source_url {
            event.source_url = Some(v.clone());
            event.stamp(FIELD_SOURCE_URL, origin, confidence);
        }
        if let Some(v) = &self.ticket_url {
            event.ticket_url = Some(v.clone());
            event.stamp(FIELD_TICKET_URL, origin, confidence);
        }
        if let Some(v) = &self.detail_url {
            event.detail_url = Some(v.clone());
            event.stamp(FIELD_DETAIL_URL, origin, confidence);
        }
        if let Some(v) = self.age_restriction {
            event.policy.age_restriction = Some(v);
            event.stamp(FIELD_AGE_RESTRICTION, origin, confidence);
        }
        if let Some(v) = self.reentry_allowed {
            event.policy.reentry_allowed = Some(v);
            event.stamp(FIELD_REENTRY, origin, confidence);
        }
        if let Some(v) = self.ticket_status {
            event.policy.ticket_status = Some(v);
            event.stamp(FIELD_TICKET_STATUS, origin, confidence);
        }
        if self.cancelled {
            event.cancelled = true;
            event.stamp(FIELD_CANCELLED, origin, confidence);
        }
        event.updated_at = Utc::now();
    }
}

/// `Some(new)` when the candidate carries a value that differs from the stored one.
fn changed<T: PartialEq + Clone>(stored: &Option<T>, incoming: &Option<T>) -> Option<T> {
    match incoming {
        Some(value) if stored.as_ref() != Some(value) => Some(value.clone()),
        _ => None,
    }
}

fn describe_change<T: Display>(label: &str, old: &Option<T>, new: &T) -> String {
    match old {
        Some(old) => format!("{} changed from {} to {}", label, old, new),
        None => format!("{} set to {}", label, new),
    }
}

fn hhmm(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn money(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("${}", amount as i64)
    } else {
        format!("${:.2}", amount)
    }
}

pub fn format_price(price: &PriceRange) -> String {
    match (price.min, price.max) {
        (Some(min), Some(max)) if min == 0.0 && max == 0.0 => "free".to_string(),
        (Some(min), Some(max)) if min == max => money(min),
        (Some(min), Some(max)) => format!("{}-{}", money(min), money(max)),
        (Some(only), None) | (None, Some(only)) => money(only),
        (None, None) => "unknown".to_string(),
    }
}

pub fn diff(stored: &StoredEvent, candidate: &CandidateEvent) -> EventDiff {
    let mut patch = EventPatch::default();
    let mut changes = Vec::new();

    if let Some(v) = changed(&stored.description, &candidate.description) {
        patch.description = Some(v);
        changes.push("description updated".to_string());
    }

    if let Some(v) = changed(&stored.start_time, &candidate.start_time) {
        patch.start_time = Some(v);
        changes.push(describe_change("start time", &stored.start_time.map(hhmm), &hhmm(v)));
    }
    if let Some(v) = changed(&stored.end_time, &candidate.end_time) {
        patch.end_time = Some(v);
        changes.push(describe_change("end time", &stored.end_time.map(hhmm), &hhmm(v)));
    }
    if let Some(v) = changed(&stored.end_date, &candidate.end_date) {
        patch.end_date = Some(v);
        changes.push(describe_change("end date", &stored.end_date, &v));
    }

    patch.price_min = changed(&stored.price.min, &candidate.price.min);
    patch.price_max = changed(&stored.price.max, &candidate.price.max);
    if patch.price_min.is_some() || patch.price_max.is_some() {
        let new_price = PriceRange {
            min: patch.price_min.or(stored.price.min),
            max: patch.price_max.or(stored.price.max),
            note: None,
        };
        changes.push(format!(
            "price changed from {} to {}",
            format_price(&stored.price),
            format_price(&new_price)
        ));
    }
    if let Some(v) = changed(&stored.price.note, &candidate.price.note) {
        patch.price_note = Some(v);
        changes.push("price note updated".to_string());
    }

    if let Some(v) = changed(&stored.ticket_url, &candidate.ticket_url) {
        patch.ticket_url = Some(v);
        changes.push("ticket link updated".to_string());
    }
    if let Some(v) = changed(&stored.source_url, &candidate.source_url) {
        patch.source_url = Some(v);
        changes.push("source link updated".to_string());
    }
    if let Some(v) = changed(&stored.detail_url, &candidate.detail_url) {
        patch.detail_url = Some(v);
        changes.push("detail link updated".to_string());
    }

    let (old, new) = (&stored.policy, &candidate.policy);
    if let Some(v) = changed(&old.age_restriction, &new.age_restriction) {
        patch.age_restriction = Some(v);
        changes.push(describe_change("age restriction", &old.age_restriction, &v));
    }
    if let Some(v) = changed(&old.reentry_allowed, &new.reentry_allowed) {
        patch.reentry_allowed = Some(v);
        let label = if v { "allowed" } else { "not allowed" };
        changes.push(format!("re-entry policy changed to {}", label));
    }
    if let Some(v) = changed(&old.ticket_status, &new.ticket_status) {
        patch.ticket_status = Some(v);
        changes.push(describe_change("ticket status", &old.ticket_status, &v));
    }

    let cancelled = candidate.cancelled && !stored.cancelled;
    patch.cancelled = cancelled;

    EventDiff {
        patch,
        changes,
        cancelled,
    }
}
