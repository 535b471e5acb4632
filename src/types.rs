use crate::constants::{
    FIELD_AGE_RESTRICTION, FIELD_CANCELLED, FIELD_DESCRIPTION, FIELD_DETAIL_URL, FIELD_END_DATE,
    FIELD_END_TIME, FIELD_PRICE_MAX, FIELD_PRICE_MIN, FIELD_PRICE_NOTE, FIELD_REENTRY,
    FIELD_SOURCE_URL, FIELD_START_TIME, FIELD_TICKET_STATUS, FIELD_TICKET_URL, FIELD_TITLE,
};
use crate::error::Result;
use crate::fingerprint::content_hash;
use crate::lineup::lineup_from_credits;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// An artist entry as a source adapter reports it: a bare name or a name with a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtistInput {
    Name(String),
    Credit {
        name: String,
        #[serde(default)]
        role: Option<String>,
    },
}

/// Loosely structured record produced by a source adapter for one listing.
///
/// Every field is optional; the Normalizer decides what is usable. Aliases absorb
/// the naming drift between adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceRecord {
    #[serde(alias = "name")]
    pub title: Option<String>,
    #[serde(alias = "date", alias = "event_day")]
    pub start_date: Option<String>,
    #[serde(alias = "time")]
    pub start_time: Option<String>,
    pub end_date: Option<String>,
    pub end_time: Option<String>,
    pub venue_id: Option<Uuid>,
    #[serde(alias = "venue_name", alias = "location")]
    pub venue: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub price: Option<String>,
    pub price_note: Option<String>,
    #[serde(alias = "url")]
    pub source_url: Option<String>,
    pub ticket_url: Option<String>,
    pub detail_url: Option<String>,
    #[serde(alias = "image")]
    pub image_url: Option<String>,
    pub images: Vec<String>,
    pub artists: Vec<ArtistInput>,
    pub confidence: Option<f64>,
    pub extraction_version: Option<String>,
    pub age_restriction: Option<String>,
    pub reentry_allowed: Option<bool>,
    pub ticket_status: Option<String>,
    pub cancelled: Option<bool>,
    pub status: Option<String>,
}

/// How a candidate names its venue before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VenueRef {
    Id(Uuid),
    Name(String),
    /// The source gave no venue at all.
    Unknown,
}

impl VenueRef {
    /// Venue name fed to the content hash; an unknown venue hashes as empty.
    pub fn hash_name<'a>(&self, resolved: &'a Venue) -> &'a str {
        match self {
            VenueRef::Unknown => "",
            _ => &resolved.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistCredit {
    pub name: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Source,
    Ticket,
    Detail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLink {
    pub url: String,
    pub kind: LinkKind,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeRestriction {
    AllAges,
    MinimumAge(u8),
}

impl fmt::Display for AgeRestriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgeRestriction::AllAges => write!(f, "all ages"),
            AgeRestriction::MinimumAge(age) => write!(f, "{}+", age),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    OnSale,
    Limited,
    SoldOut,
    Postponed,
    Cancelled,
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TicketStatus::OnSale => "on sale",
            TicketStatus::Limited => "limited",
            TicketStatus::SoldOut => "sold out",
            TicketStatus::Postponed => "postponed",
            TicketStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Attendance policy flags carried by an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPolicy {
    pub age_restriction: Option<AgeRestriction>,
    pub reentry_allowed: Option<bool>,
    pub ticket_status: Option<TicketStatus>,
}

/// An unpersisted event produced by one source adapter for one discovery pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub title: String,
    pub start_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_date: Option<NaiveDate>,
    pub end_time: Option<NaiveTime>,
    pub venue: VenueRef,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    pub price: PriceRange,
    pub source_url: Option<String>,
    pub ticket_url: Option<String>,
    pub detail_url: Option<String>,
    pub images: Vec<ImageRef>,
    pub artists: Vec<ArtistCredit>,
    pub confidence: f64,
    pub extraction_version: String,
    pub policy: EventPolicy,
    /// Explicit cancellation marker; never inferred from missing fields.
    pub cancelled: bool,
    pub source_name: String,
}

impl CandidateEvent {
    /// Venue key used for in-batch grouping: the id, or the case-folded name.
    pub fn venue_key(&self) -> String {
        match &self.venue {
            VenueRef::Id(id) => id.to_string(),
            VenueRef::Name(name) => fold_venue_name(name),
            VenueRef::Unknown => String::new(),
        }
    }

    pub fn links(&self) -> Vec<EventLink> {
        let mut links = Vec::new();
        let pairs = [
            (&self.source_url, LinkKind::Source),
            (&self.ticket_url, LinkKind::Ticket),
            (&self.detail_url, LinkKind::Detail),
        ];
        for (url, kind) in pairs {
            if let Some(url) = url {
                links.push(EventLink {
                    url: url.clone(),
                    kind,
                    confidence: self.confidence,
                });
            }
        }
        links
    }
}

/// Canonical pointer of a stored event.
///
/// A `PointsTo` target is always a root; the resolver writes the flattened target
/// directly, so chains cannot be expressed by the writes it makes. Serializes as the
/// nullable `canonical_event_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<Uuid>", into = "Option<Uuid>")]
pub enum CanonicalRef {
    Root,
    PointsTo(Uuid),
}

impl CanonicalRef {
    pub fn is_root(&self) -> bool {
        matches!(self, CanonicalRef::Root)
    }

    pub fn canonical_event_id(&self) -> Option<Uuid> {
        match self {
            CanonicalRef::Root => None,
            CanonicalRef::PointsTo(id) => Some(*id),
        }
    }
}

impl From<Option<Uuid>> for CanonicalRef {
    fn from(value: Option<Uuid>) -> Self {
        match value {
            Some(id) => CanonicalRef::PointsTo(id),
            None => CanonicalRef::Root,
        }
    }
}

impl From<CanonicalRef> for Option<Uuid> {
    fn from(value: CanonicalRef) -> Self {
        value.canonical_event_id()
    }
}

impl fmt::Display for CanonicalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalRef::Root => write!(f, "root"),
            CanonicalRef::PointsTo(id) => write!(f, "-> {}", id),
        }
    }
}

/// Which source and URL produced a field's current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSource {
    pub source: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventArtist {
    pub name: String,
    pub role: Option<String>,
    pub billing_order: u32,
    pub is_headliner: bool,
}

/// The durable catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: Uuid,
    pub content_hash: String,
    #[serde(rename = "canonical_event_id")]
    pub canonical: CanonicalRef,
    pub title: String,
    pub start_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_date: Option<NaiveDate>,
    pub end_time: Option<NaiveTime>,
    pub venue_id: Uuid,
    pub venue_name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: BTreeSet<String>,
    pub price: PriceRange,
    pub source_url: Option<String>,
    pub ticket_url: Option<String>,
    pub detail_url: Option<String>,
    pub images: Vec<ImageRef>,
    pub links: Vec<EventLink>,
    pub artists: Vec<EventArtist>,
    pub confidence: f64,
    pub extraction_version: String,
    pub policy: EventPolicy,
    pub cancelled: bool,
    pub field_provenance: BTreeMap<String, FieldSource>,
    pub field_confidence: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Build a fresh root row for a candidate at a resolved venue.
    pub fn from_candidate(candidate: &CandidateEvent, venue: &Venue) -> Self {
        let now = Utc::now();
        let mut event = StoredEvent {
            id: Uuid::new_v4(),
            content_hash: content_hash(
                &candidate.title,
                candidate.venue.hash_name(venue),
                candidate.start_date,
            ),
            canonical: CanonicalRef::Root,
            title: candidate.title.clone(),
            start_date: candidate.start_date,
            start_time: candidate.start_time,
            end_date: candidate.end_date,
            end_time: candidate.end_time,
            venue_id: venue.id,
            venue_name: venue.name.clone(),
            description: candidate.description.clone(),
            category: candidate.category.clone(),
            tags: candidate.tags.clone(),
            price: candidate.price.clone(),
            source_url: candidate.source_url.clone(),
            ticket_url: candidate.ticket_url.clone(),
            detail_url: candidate.detail_url.clone(),
            images: candidate.images.clone(),
            links: candidate.links(),
            artists: lineup_from_credits(&candidate.title, &candidate.artists),
            confidence: candidate.confidence,
            extraction_version: candidate.extraction_version.clone(),
            policy: candidate.policy.clone(),
            cancelled: candidate.cancelled,
            field_provenance: BTreeMap::new(),
            field_confidence: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };

        let present = [
            (FIELD_TITLE, true),
            (FIELD_DESCRIPTION, candidate.description.is_some()),
            (FIELD_START_TIME, candidate.start_time.is_some()),
            (FIELD_END_TIME, candidate.end_time.is_some()),
            (FIELD_END_DATE, candidate.end_date.is_some()),
            (FIELD_PRICE_MIN, candidate.price.min.is_some()),
            (FIELD_PRICE_MAX, candidate.price.max.is_some()),
            (FIELD_PRICE_NOTE, candidate.price.note.is_some()),
            (FIELD_SOURCE_URL, candidate.source_url.is_some()),
            (FIELD_TICKET_URL, candidate.ticket_url.is_some()),
            (FIELD_DETAIL_URL, candidate.detail_url.is_some()),
            (FIELD_AGE_RESTRICTION, candidate.policy.age_restriction.is_some()),
            (FIELD_REENTRY, candidate.policy.reentry_allowed.is_some()),
            (FIELD_TICKET_STATUS, candidate.policy.ticket_status.is_some()),
            (FIELD_CANCELLED, candidate.cancelled),
        ];
        let origin = FieldSource {
            source: candidate.source_name.clone(),
            url: candidate.source_url.clone(),
        };
        for (field, is_present) in present {
            if is_present {
                event.stamp(field, &origin, candidate.confidence);
            }
        }
        event
    }

    /// Record which source last wrote `field` and with what confidence.
    pub fn stamp(&mut self, field: &str, origin: &FieldSource, confidence: f64) {
        self.field_provenance.insert(field.to_string(), origin.clone());
        self.field_confidence.insert(field.to_string(), confidence);
    }

    pub fn artist_names(&self) -> Vec<String> {
        self.artists.iter().map(|a| a.name.clone()).collect()
    }
}

/// Trim and case-fold a venue name for matching; display names are kept separately.
pub fn fold_venue_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: Uuid,
    pub name: String,
    pub name_folded: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

impl Venue {
    /// Create a new venue with generated derived fields
    pub fn new(name: &str) -> Self {
        let display = name.trim().to_string();
        let name_folded = fold_venue_name(&display);
        let slug = name_folded
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");

        Self {
            id: Uuid::new_v4(),
            name: display,
            name_folded,
            slug,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Updated,
    Cancelled,
}

/// A user-facing message about a change to a stored event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub event_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub changes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Core trait every event source must implement.
///
/// Adapters own their fetch loop (rate limiting, pagination, parsing) and hand the
/// core plain records; they share no mutable state with one another.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique identifier for this source
    fn source_name(&self) -> &str;

    /// Extraction version stamped on records that do not declare their own
    fn extraction_version(&self) -> &str {
        crate::constants::DEFAULT_EXTRACTION_VERSION
    }

    /// Fetch every listing from this source for one discovery pass
    async fn fetch_records(&self) -> Result<Vec<SourceRecord>>;
}
