use crate::differ::EventPatch;
use crate::error::Result;
use crate::types::{
    CanonicalRef, EventArtist, EventLink, FieldSource, ImageRef, Notification, StoredEvent, Venue,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

/// Result of an insert guarded by the content hash.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(Uuid),
    /// Another writer already holds this hash; the stored row is returned instead.
    Duplicate(StoredEvent),
}

/// Persistence gateway for the catalog.
///
/// Every write is per-event; nothing spans a batch, so an aborted run leaves all
/// earlier writes valid.
#[async_trait]
pub trait Storage: Send + Sync {
    // Venue operations
    async fn resolve_or_create_venue(&self, name: &str) -> Result<Venue>;
    async fn get_venue(&self, venue_id: Uuid) -> Result<Option<Venue>>;
    async fn list_venues(&self) -> Result<Vec<Venue>>;
    async fn get_venues_by_slugs(&self, slugs: &[String]) -> Result<Vec<Venue>>;

    // Event lookups
    async fn get_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>>;
    async fn find_event_by_hash(&self, content_hash: &str) -> Result<Option<StoredEvent>>;
    async fn find_events_by_venue_date(
        &self,
        venue_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<StoredEvent>>;
    async fn find_events_for_venues_from(
        &self,
        venue_ids: &[Uuid],
        from_date: NaiveDate,
    ) -> Result<Vec<StoredEvent>>;
    /// Rows whose canonical pointer targets `root_id`.
    async fn find_children(&self, root_id: Uuid) -> Result<Vec<StoredEvent>>;

    // Event writes
    /// Inserts unless a row with the same `content_hash` exists; check and insert are atomic.
    async fn insert_event(&self, event: &StoredEvent) -> Result<InsertOutcome>;
    /// Applies `patch` to the row as currently stored and returns the updated row.
    /// Columns the patch leaves alone keep whatever other writers put there.
    async fn update_event(
        &self,
        event_id: Uuid,
        patch: &EventPatch,
        origin: &FieldSource,
        confidence: f64,
    ) -> Result<StoredEvent>;
    async fn set_canonical(&self, event_id: Uuid, canonical: CanonicalRef) -> Result<()>;
    /// Replaces the ordered lineup of an event.
    async fn replace_event_artists(&self, event_id: Uuid, artists: &[EventArtist]) -> Result<()>;
    /// Merges `incoming` after the stored lineup, skipping names already billed.
    async fn merge_event_artists(&self, event_id: Uuid, incoming: &[EventArtist]) -> Result<()>;
    /// Dedupes by URL, keeping the highest confidence seen.
    async fn upsert_event_images(&self, event_id: Uuid, images: &[ImageRef]) -> Result<()>;
    /// Dedupes by URL, keeping the highest confidence seen.
    async fn upsert_event_links(&self, event_id: Uuid, links: &[EventLink]) -> Result<()>;

    // Notifications
    async fn create_notification(&self, notification: &Notification) -> Result<()>;
}

/// Order events by date, time, creation and id so every backend lists them alike.
pub(crate) fn sort_events(mut events: Vec<StoredEvent>) -> Vec<StoredEvent> {
    events.sort_by(|a, b| {
        a.start_date
            .cmp(&b.start_date)
            .then_with(|| a.start_time.cmp(&b.start_time))
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    events
}

/// Merge `incoming` images into `existing` by URL; returns true when anything changed.
pub fn merge_images(existing: &mut Vec<ImageRef>, incoming: &[ImageRef]) -> bool {
    let mut changed = false;
    for image in incoming {
        match existing.iter_mut().find(|i| i.url == image.url) {
            Some(current) if image.confidence > current.confidence => {
                current.confidence = image.confidence;
                changed = true;
            }
            Some(_) => {}
            None => {
                existing.push(image.clone());
                changed = true;
            }
        }
    }
    changed
}

/// Merge `incoming` links into `existing` by URL; returns true when anything changed.
pub fn merge_links(existing: &mut Vec<EventLink>, incoming: &[EventLink]) -> bool {
    let mut changed = false;
    for link in incoming {
        match existing.iter_mut().find(|l| l.url == link.url) {
            Some(current) if link.confidence > current.confidence => {
                current.confidence = link.confidence;
                current.kind = link.kind;
                changed = true;
            }
            Some(_) => {}
            None => {
                existing.push(link.clone());
                changed = true;
            }
        }
    }
    changed
}
