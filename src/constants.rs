//! Shared constants for the ingestion core.

/// Confidence assumed when a source record does not report one.
pub const DEFAULT_CONFIDENCE: f64 = 1.0;

/// Time-of-day used for slot keys when an event has no start time.
pub const DEFAULT_SLOT_TIME: &str = "00:00";

/// Extraction version stamped on candidates whose source does not declare one.
pub const DEFAULT_EXTRACTION_VERSION: &str = "v1";

/// Catalog venue that holds events whose source named no venue.
pub const UNKNOWN_VENUE_NAME: &str = "Unknown Venue";

/// Descriptions longer than this earn a quality point.
pub const RICH_DESCRIPTION_CHARS: usize = 80;

/// Score bonus for a stored event that is already a canonical root.
pub const STABILITY_BONUS: i32 = 2;

/// Co-billed shows in one slot survive dedup when within this many points of the winner.
pub const CO_BILL_SCORE_WINDOW: i32 = 1;

// Field names tracked in `field_provenance` / `field_confidence`
pub const FIELD_TITLE: &str = "title";
pub const FIELD_DESCRIPTION: &str = "description";
pub const FIELD_START_TIME: &str = "start_time";
pub const FIELD_END_TIME: &str = "end_time";
pub const FIELD_END_DATE: &str = "end_date";
pub const FIELD_PRICE_MIN: &str = "price_min";
pub const FIELD_PRICE_MAX: &str = "price_max";
pub const FIELD_PRICE_NOTE: &str = "price_note";
pub const FIELD_SOURCE_URL: &str = "source_url";
pub const FIELD_TICKET_URL: &str = "ticket_url";
pub const FIELD_DETAIL_URL: &str = "detail_url";
pub const FIELD_AGE_RESTRICTION: &str = "age_restriction";
pub const FIELD_REENTRY: &str = "reentry_allowed";
pub const FIELD_TICKET_STATUS: &str = "ticket_status";
pub const FIELD_CANCELLED: &str = "cancelled";

/// Status strings that count as an explicit cancellation marker.
pub const CANCELLED_STATUSES: &[&str] = &["cancelled", "canceled"];
