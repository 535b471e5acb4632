#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use event_ingest::differ::EventPatch;
use event_ingest::error::{IngestError, Result};
use event_ingest::normalize::{Normalized, Normalizer};
use event_ingest::storage::{InMemoryStorage, InsertOutcome, Storage};
use event_ingest::types::{
    CandidateEvent, CanonicalRef, EventArtist, EventLink, FieldSource, ImageRef, Notification,
    SourceAdapter, SourceRecord, StoredEvent, Venue,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Adapter that hands back a fixed set of records, optionally after a delay.
pub struct StaticSource {
    pub name: String,
    pub records: Vec<SourceRecord>,
    pub delay: Option<Duration>,
}

impl StaticSource {
    pub fn new(name: &str, records: Vec<SourceRecord>) -> Self {
        Self {
            name: name.to_string(),
            records,
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl SourceAdapter for StaticSource {
    fn source_name(&self) -> &str {
        &self.name
    }

    async fn fetch_records(&self) -> Result<Vec<SourceRecord>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.records.clone())
    }
}

/// Adapter whose fetch always fails.
pub struct BrokenSource;

#[async_trait]
impl SourceAdapter for BrokenSource {
    fn source_name(&self) -> &str {
        "broken"
    }

    async fn fetch_records(&self) -> Result<Vec<SourceRecord>> {
        Err(IngestError::Source {
            source_name: "broken".to_string(),
            message: "connection reset".to_string(),
        })
    }
}

pub fn record(value: Value) -> SourceRecord {
    serde_json::from_value(value).unwrap()
}

pub fn candidate(value: Value) -> CandidateEvent {
    match Normalizer::new("test", "v1").normalize(&record(value)) {
        Normalized::Candidate(c) => c,
        Normalized::Dropped(reason) => panic!("record dropped: {}", reason),
    }
}

/// Wraps `InMemoryStorage` to inject a competing writer or a failed pointer write.
pub struct HookedStorage {
    pub inner: Arc<InMemoryStorage>,
    /// Upserted onto the target row right before each `update_event` reaches the store.
    pub sibling_image: Option<ImageRef>,
    /// 1-based index of the `set_canonical` call that fails.
    pub fail_canonical_write: Option<usize>,
    canonical_writes: AtomicUsize,
}

impl HookedStorage {
    pub fn new(inner: Arc<InMemoryStorage>) -> Self {
        Self {
            inner,
            sibling_image: None,
            fail_canonical_write: None,
            canonical_writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Storage for HookedStorage {
    async fn resolve_or_create_venue(&self, name: &str) -> Result<Venue> {
        self.inner.resolve_or_create_venue(name).await
    }
    async fn get_venue(&self, venue_id: Uuid) -> Result<Option<Venue>> {
        self.inner.get_venue(venue_id).await
    }
    async fn list_venues(&self) -> Result<Vec<Venue>> {
        self.inner.list_venues().await
    }
    async fn get_venues_by_slugs(&self, slugs: &[String]) -> Result<Vec<Venue>> {
        self.inner.get_venues_by_slugs(slugs).await
    }
    async fn get_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>> {
        self.inner.get_event(event_id).await
    }
    async fn find_event_by_hash(&self, content_hash: &str) -> Result<Option<StoredEvent>> {
        self.inner.find_event_by_hash(content_hash).await
    }
    async fn find_events_by_venue_date(
        &self,
        venue_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<StoredEvent>> {
        self.inner.find_events_by_venue_date(venue_id, date).await
    }
    async fn find_events_for_venues_from(
        &self,
        venue_ids: &[Uuid],
        from_date: NaiveDate,
    ) -> Result<Vec<StoredEvent>> {
        self.inner.find_events_for_venues_from(venue_ids, from_date).await
    }
    async fn find_children(&self, root_id: Uuid) -> Result<Vec<StoredEvent>> {
        self.inner.find_children(root_id).await
    }
    async fn insert_event(&self, event: &StoredEvent) -> Result<InsertOutcome> {
        self.inner.insert_event(event).await
    }
    async fn update_event(
        &self,
        event_id: Uuid,
        patch: &EventPatch,
        origin: &FieldSource,
        confidence: f64,
    ) -> Result<StoredEvent> {
        if let Some(image) = &self.sibling_image {
            self.inner
                .upsert_event_images(event_id, std::slice::from_ref(image))
                .await?;
        }
        self.inner.update_event(event_id, patch, origin, confidence).await
    }
    async fn set_canonical(&self, event_id: Uuid, canonical: CanonicalRef) -> Result<()> {
        let call = self.canonical_writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_canonical_write == Some(call) {
            return Err(IngestError::storage("injected pointer write failure"));
        }
        self.inner.set_canonical(event_id, canonical).await
    }
    async fn replace_event_artists(&self, event_id: Uuid, artists: &[EventArtist]) -> Result<()> {
        self.inner.replace_event_artists(event_id, artists).await
    }
    async fn merge_event_artists(&self, event_id: Uuid, incoming: &[EventArtist]) -> Result<()> {
        self.inner.merge_event_artists(event_id, incoming).await
    }
    async fn upsert_event_images(&self, event_id: Uuid, images: &[ImageRef]) -> Result<()> {
        self.inner.upsert_event_images(event_id, images).await
    }
    async fn upsert_event_links(&self, event_id: Uuid, links: &[EventLink]) -> Result<()> {
        self.inner.upsert_event_links(event_id, links).await
    }
    async fn create_notification(&self, notification: &Notification) -> Result<()> {
        self.inner.create_notification(notification).await
    }
}

/// Panics if any row points at a row that is not itself a root.
pub fn assert_no_chains(events: &[StoredEvent]) {
    for event in events {
        if let CanonicalRef::PointsTo(target) = event.canonical {
            let root = events.iter().find(|e| e.id == target);
            assert!(
                root.map_or(false, |r| r.canonical.is_root()),
                "{} points at {} which is not a root",
                event.id,
                target
            );
        }
    }
}
