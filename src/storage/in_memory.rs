use super::{merge_images, merge_links, sort_events, InsertOutcome, Storage};
use crate::differ::EventPatch;
use crate::error::{IngestError, Result};
use crate::lineup::merge_lineups;
use crate::types::{
    fold_venue_name, CanonicalRef, EventArtist, EventLink, FieldSource, ImageRef, Notification,
    StoredEvent, Venue,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct EventTable {
    rows: HashMap<Uuid, StoredEvent>,
    by_hash: HashMap<String, Uuid>,
}

/// In-memory storage implementation for development/testing
pub struct InMemoryStorage {
    venues: Arc<Mutex<HashMap<Uuid, Venue>>>,
    events: Arc<Mutex<EventTable>>,
    notifications: Arc<Mutex<Vec<Notification>>>,
    event_writes: AtomicUsize,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| IngestError::storage("in-memory store lock poisoned"))
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            venues: Arc::new(Mutex::new(HashMap::new())),
            events: Arc::new(Mutex::new(EventTable::default())),
            notifications: Arc::new(Mutex::new(Vec::new())),
            event_writes: AtomicUsize::new(0),
        }
    }

    /// Number of event-level writes performed (inserts, updates, pointer and child-row writes).
    pub fn event_writes(&self) -> usize {
        self.event_writes.load(Ordering::SeqCst)
    }

    pub fn notifications(&self) -> Result<Vec<Notification>> {
        Ok(lock(&self.notifications)?.clone())
    }

    pub fn all_events(&self) -> Result<Vec<StoredEvent>> {
        Ok(sort_events(lock(&self.events)?.rows.values().cloned().collect()))
    }

    fn record_write(&self) {
        self.event_writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Mutates the stored row in place under the table lock and returns a copy of it.
    fn modify_event<F>(&self, event_id: Uuid, f: F) -> Result<StoredEvent>
    where
        F: FnOnce(&mut StoredEvent),
    {
        let mut table = lock(&self.events)?;
        let event = table
            .rows
            .get_mut(&event_id)
            .ok_or_else(|| IngestError::NotFound(format!("event {}", event_id)))?;
        f(event);
        event.updated_at = Utc::now();
        let updated = event.clone();
        drop(table);
        self.record_write();
        Ok(updated)
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn resolve_or_create_venue(&self, name: &str) -> Result<Venue> {
        let folded = fold_venue_name(name);
        if folded.is_empty() {
            return Err(IngestError::MissingField("venue name".to_string()));
        }

        let mut venues = lock(&self.venues)?;
        if let Some(existing) = venues.values().find(|v| v.name_folded == folded) {
            return Ok(existing.clone());
        }

        let venue = Venue::new(name);
        venues.insert(venue.id, venue.clone());
        debug!("Created venue: {} with id {}", venue.name, venue.id);
        Ok(venue)
    }

    async fn get_venue(&self, venue_id: Uuid) -> Result<Option<Venue>> {
        Ok(lock(&self.venues)?.get(&venue_id).cloned())
    }

    async fn list_venues(&self) -> Result<Vec<Venue>> {
        let mut venues: Vec<Venue> = lock(&self.venues)?.values().cloned().collect();
        venues.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(venues)
    }

    async fn get_venues_by_slugs(&self, slugs: &[String]) -> Result<Vec<Venue>> {
        let venues = lock(&self.venues)?;
        let mut found: Vec<Venue> = venues
            .values()
            .filter(|v| slugs.iter().any(|s| s == &v.slug))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(found)
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>> {
        Ok(lock(&self.events)?.rows.get(&event_id).cloned())
    }

    async fn find_event_by_hash(&self, content_hash: &str) -> Result<Option<StoredEvent>> {
        let table = lock(&self.events)?;
        Ok(table
            .by_hash
            .get(content_hash)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn find_events_by_venue_date(
        &self,
        venue_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<StoredEvent>> {
        let table = lock(&self.events)?;
        Ok(sort_events(
            table
                .rows
                .values()
                .filter(|e| e.venue_id == venue_id && e.start_date == date)
                .cloned()
                .collect(),
        ))
    }

    async fn find_events_for_venues_from(
        &self,
        venue_ids: &[Uuid],
        from_date: NaiveDate,
    ) -> Result<Vec<StoredEvent>> {
        let table = lock(&self.events)?;
        Ok(sort_events(
            table
                .rows
                .values()
                .filter(|e| venue_ids.contains(&e.venue_id) && e.start_date >= from_date)
                .cloned()
                .collect(),
        ))
    }

    async fn find_children(&self, root_id: Uuid) -> Result<Vec<StoredEvent>> {
        let table = lock(&self.events)?;
        Ok(sort_events(
            table
                .rows
                .values()
                .filter(|e| e.canonical == CanonicalRef::PointsTo(root_id))
                .cloned()
                .collect(),
        ))
    }

    async fn insert_event(&self, event: &StoredEvent) -> Result<InsertOutcome> {
        let mut table = lock(&self.events)?;
        if let Some(existing_id) = table.by_hash.get(&event.content_hash) {
            if let Some(existing) = table.rows.get(existing_id) {
                debug!("Hash {} already held by event {}", event.content_hash, existing_id);
                return Ok(InsertOutcome::Duplicate(existing.clone()));
            }
        }
        table.by_hash.insert(event.content_hash.clone(), event.id);
        table.rows.insert(event.id, event.clone());
        drop(table);
        self.record_write();

        debug!("Created event: {} with id {}", event.title, event.id);
        Ok(InsertOutcome::Inserted(event.id))
    }

    async fn update_event(
        &self,
        event_id: Uuid,
        patch: &EventPatch,
        origin: &FieldSource,
        confidence: f64,
    ) -> Result<StoredEvent> {
        let updated = self.modify_event(event_id, |e| patch.apply(e, origin, confidence))?;
        debug!("Updated event: {} with id {}", updated.title, updated.id);
        Ok(updated)
    }

    async fn set_canonical(&self, event_id: Uuid, canonical: CanonicalRef) -> Result<()> {
        self.modify_event(event_id, |e| e.canonical = canonical)?;
        Ok(())
    }

    async fn replace_event_artists(&self, event_id: Uuid, artists: &[EventArtist]) -> Result<()> {
        let lineup = artists.to_vec();
        self.modify_event(event_id, move |e| e.artists = lineup)?;
        Ok(())
    }

    async fn merge_event_artists(&self, event_id: Uuid, incoming: &[EventArtist]) -> Result<()> {
        self.modify_event(event_id, |e| {
            e.artists = merge_lineups(&e.title, [e.artists.as_slice(), incoming]);
        })?;
        Ok(())
    }

    async fn upsert_event_images(&self, event_id: Uuid, images: &[ImageRef]) -> Result<()> {
        self.modify_event(event_id, |e| {
            merge_images(&mut e.images, images);
        })?;
        Ok(())
    }

    async fn upsert_event_links(&self, event_id: Uuid, links: &[EventLink]) -> Result<()> {
        self.modify_event(event_id, |e| {
            merge_links(&mut e.links, links);
        })?;
        Ok(())
    }

    async fn create_notification(&self, notification: &Notification) -> Result<()> {
        lock(&self.notifications)?.push(notification.clone());
        debug!("Created notification {} for event {}", notification.id, notification.event_id);
        Ok(())
    }
}
