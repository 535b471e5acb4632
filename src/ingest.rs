//! Per-candidate read-modify-write against the catalog, and the per-source runs
//! that drive it.

use crate::constants::UNKNOWN_VENUE_NAME;
use crate::dedup::dedup_batch;
use crate::differ::diff;
use crate::error::{IngestError, Result};
use crate::fingerprint::content_hash;
use crate::lineup::{lineup_from_credits, merge_lineups};
use crate::matcher::find_existing;
use crate::normalize::Normalizer;
use crate::notify::NotificationEmitter;
use crate::storage::{merge_images, merge_links, InsertOutcome, Storage};
use crate::types::{
    fold_venue_name, CandidateEvent, FieldSource, SourceAdapter, StoredEvent, Venue, VenueRef,
};
use metrics::counter;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// State scoped to one source run. Never shared between concurrent runs.
#[derive(Debug)]
pub struct RunContext {
    pub source_name: String,
    venues: HashMap<String, Venue>,
}

impl RunContext {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            venues: HashMap::new(),
        }
    }

    pub fn cached_venues(&self) -> usize {
        self.venues.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Records that normalized into a candidate.
    pub found: usize,
    pub dropped: usize,
    pub deduplicated: usize,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub notifications: usize,
    pub cancelled: usize,
}

impl fmt::Display for IngestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "found {}, dropped {}, deduplicated {}, new {}, updated {}, unchanged {}, skipped {}, notifications {}, cancelled {}",
            self.found,
            self.dropped,
            self.deduplicated,
            self.new,
            self.updated,
            self.unchanged,
            self.skipped,
            self.notifications,
            self.cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    Inserted(Uuid),
    Updated {
        id: Uuid,
        changes: Vec<String>,
        cancelled: bool,
    },
    Unchanged(Uuid),
}

#[derive(Debug, Clone)]
pub struct SourceRunReport {
    pub source_name: String,
    pub stats: IngestStats,
    /// Set when the run ended early (fetch failure, timeout or panic).
    pub failed: Option<String>,
}

impl SourceRunReport {
    fn failed(source_name: &str, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.to_string(),
            stats: IngestStats::default(),
            failed: Some(message.into()),
        }
    }
}

impl fmt::Display for SourceRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failed {
            Some(reason) => write!(f, "{}: FAILED ({}); {}", self.source_name, reason, self.stats),
            None => write!(f, "{}: {}", self.source_name, self.stats),
        }
    }
}

#[derive(Clone)]
pub struct Ingestor {
    storage: Arc<dyn Storage>,
}

impl Ingestor {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    async fn resolve_venue(&self, ctx: &mut RunContext, venue: &VenueRef) -> Result<Venue> {
        let key = match venue {
            VenueRef::Id(id) => id.to_string(),
            VenueRef::Name(name) => fold_venue_name(name),
            VenueRef::Unknown => String::new(),
        };
        if let Some(cached) = ctx.venues.get(&key) {
            return Ok(cached.clone());
        }

        let resolved = match venue {
            VenueRef::Id(id) => self
                .storage
                .get_venue(*id)
                .await?
                .ok_or_else(|| IngestError::NotFound(format!("venue {}", id)))?,
            VenueRef::Name(name) => self.storage.resolve_or_create_venue(name).await?,
            VenueRef::Unknown => {
                self.storage
                    .resolve_or_create_venue(UNKNOWN_VENUE_NAME)
                    .await?
            }
        };
        ctx.venues.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Fingerprint, match, then insert or diff-and-patch one candidate.
    pub async fn ingest_candidate(
        &self,
        ctx: &mut RunContext,
        candidate: &CandidateEvent,
    ) -> Result<CandidateOutcome> {
        let venue = self.resolve_venue(ctx, &candidate.venue).await?;
        let hash = content_hash(
            &candidate.title,
            candidate.venue.hash_name(&venue),
            candidate.start_date,
        );

        if let Some(matched) = find_existing(self.storage.as_ref(), candidate, venue.id, &hash).await? {
            debug!(event_id = %matched.event.id, via = ?matched.via, "Matched existing event");
            return self.update_existing(matched.event, candidate).await;
        }

        let event = StoredEvent::from_candidate(candidate, &venue);
        match self.storage.insert_event(&event).await? {
            InsertOutcome::Inserted(id) => {
                info!(event_id = %id, title = %event.title, date = %event.start_date, "Inserted new event");
                Ok(CandidateOutcome::Inserted(id))
            }
            InsertOutcome::Duplicate(existing) => {
                // Another run claimed this hash between our lookup and insert
                debug!(event_id = %existing.id, "Lost insert race; updating instead");
                self.update_existing(existing, candidate).await
            }
        }
    }

    async fn update_existing(
        &self,
        existing: StoredEvent,
        candidate: &CandidateEvent,
    ) -> Result<CandidateOutcome> {
        let event_diff = diff(&existing, candidate);
        let mut event = existing;
        let mut wrote = false;

        if !event_diff.patch.is_empty() {
            let origin = FieldSource {
                source: candidate.source_name.clone(),
                url: candidate.source_url.clone(),
            };
            event = self
                .storage
                .update_event(event.id, &event_diff.patch, &origin, candidate.confidence)
                .await?;
            wrote = true;
        }

        let mut images = event.images.clone();
        if merge_images(&mut images, &candidate.images) {
            self.storage.upsert_event_images(event.id, &candidate.images).await?;
            wrote = true;
        }

        let incoming_links = candidate.links();
        let mut links = event.links.clone();
        if merge_links(&mut links, &incoming_links) {
            self.storage.upsert_event_links(event.id, &incoming_links).await?;
            wrote = true;
        }

        if !candidate.artists.is_empty() {
            let incoming = lineup_from_credits(&event.title, &candidate.artists);
            let merged = merge_lineups(&event.title, [event.artists.as_slice(), incoming.as_slice()]);
            if merged != event.artists {
                self.storage.merge_event_artists(event.id, &incoming).await?;
                wrote = true;
            }
        }

        NotificationEmitter::emit(
            self.storage.as_ref(),
            &event,
            &event_diff.changes,
            event_diff.cancelled,
        )
        .await?;

        if wrote {
            Ok(CandidateOutcome::Updated {
                id: event.id,
                changes: event_diff.changes,
                cancelled: event_diff.cancelled,
            })
        } else {
            Ok(CandidateOutcome::Unchanged(event.id))
        }
    }

    /// Dedup a normalized batch and ingest each survivor. Per-candidate failures are
    /// counted as skipped and never abort the batch.
    pub async fn ingest_batch(
        &self,
        ctx: &mut RunContext,
        candidates: Vec<CandidateEvent>,
        stats: &mut IngestStats,
    ) {
        let deduped = dedup_batch(candidates);
        stats.deduplicated += deduped.dropped;
        let source = ctx.source_name.clone();

        for candidate in &deduped.kept {
            match self.ingest_candidate(ctx, candidate).await {
                Ok(CandidateOutcome::Inserted(_)) => {
                    stats.new += 1;
                    counter!("ingest_events_new_total", "source" => source.clone()).increment(1);
                }
                Ok(CandidateOutcome::Updated {
                    changes, cancelled, ..
                }) => {
                    stats.updated += 1;
                    if !changes.is_empty() || cancelled {
                        stats.notifications += 1;
                    }
                    if cancelled {
                        stats.cancelled += 1;
                    }
                    counter!("ingest_events_updated_total", "source" => source.clone()).increment(1);
                }
                Ok(CandidateOutcome::Unchanged(_)) => stats.unchanged += 1,
                Err(e) => {
                    warn!(source = %source, title = %candidate.title, error = %e, "Skipping candidate");
                    stats.skipped += 1;
                    counter!("ingest_candidates_skipped_total", "source" => source.clone()).increment(1);
                }
            }
        }
    }

    /// Fetch, normalize, dedup and ingest one source.
    #[instrument(skip(self, adapter), fields(source = %adapter.source_name()))]
    pub async fn run_source(&self, adapter: Arc<dyn SourceAdapter>) -> SourceRunReport {
        let source_name = adapter.source_name().to_string();

        let records = match adapter.fetch_records().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Source fetch failed");
                counter!("ingest_source_failures_total", "source" => source_name.clone()).increment(1);
                return SourceRunReport::failed(&source_name, e.to_string());
            }
        };

        let normalizer = Normalizer::new(&source_name, adapter.extraction_version());
        let (candidates, drops) = normalizer.normalize_batch(&records);

        let mut stats = IngestStats {
            found: candidates.len(),
            dropped: drops.len(),
            ..IngestStats::default()
        };
        counter!("ingest_candidates_found_total", "source" => source_name.clone())
            .increment(stats.found as u64);
        counter!("ingest_candidates_dropped_total", "source" => source_name.clone())
            .increment(stats.dropped as u64);

        let mut ctx = RunContext::new(&source_name);
        self.ingest_batch(&mut ctx, candidates, &mut stats).await;

        info!(%stats, "Source run complete");
        SourceRunReport {
            source_name,
            stats,
            failed: None,
        }
    }

    /// Run every adapter as its own task. A timeout or panic ends only that source;
    /// writes it already made stay in place.
    pub async fn run_sources(
        &self,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        timeout: Duration,
    ) -> Vec<SourceRunReport> {
        let mut handles = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let ingestor = self.clone();
            let source_name = adapter.source_name().to_string();
            let handle = tokio::spawn(async move {
                tokio::time::timeout(timeout, ingestor.run_source(adapter)).await
            });
            handles.push((source_name, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (source_name, handle) in handles {
            let report = match handle.await {
                Ok(Ok(report)) => report,
                Ok(Err(_)) => {
                    error!(source = %source_name, timeout_secs = timeout.as_secs(), "Source run timed out");
                    counter!("ingest_source_failures_total", "source" => source_name.clone()).increment(1);
                    SourceRunReport::failed(
                        &source_name,
                        format!("timed out after {}s", timeout.as_secs()),
                    )
                }
                Err(e) => {
                    error!(source = %source_name, error = %e, "Source task aborted");
                    counter!("ingest_source_failures_total", "source" => source_name.clone()).increment(1);
                    SourceRunReport::failed(&source_name, format!("task aborted: {}", e))
                }
            };
            reports.push(report);
        }
        reports
    }
}
