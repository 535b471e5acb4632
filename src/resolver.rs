//! Batch repair pass that collapses stored duplicates onto one canonical root per slot.
//!
//! A plan is computed first and printed on dry runs. Applying re-reads every slot
//! right before writing and re-plans it, so the writes never act on a stale scan.
//! Every pointer written targets the slot winner itself, and the writes within a slot
//! are ordered so an apply that stops partway leaves no chain.

use crate::constants::STABILITY_BONUS;
use crate::dedup::time_key;
use crate::error::Result;
use crate::lineup::merge_lineups;
use crate::quality::quality_score;
use crate::storage::Storage;
use crate::types::{CanonicalRef, EventArtist, StoredEvent};
use chrono::NaiveDate;
use metrics::counter;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RepairScope {
    /// Empty means every known venue.
    pub venue_slugs: Vec<String>,
    pub from_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    PromoteRoot { event_id: Uuid },
    PointAt { event_id: Uuid, root_id: Uuid },
    ReplaceLineup { event_id: Uuid, lineup: Vec<EventArtist> },
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::PromoteRoot { event_id } => write!(f, "promote {} to canonical root", event_id),
            Mutation::PointAt { event_id, root_id } => write!(f, "point {} at {}", event_id, root_id),
            Mutation::ReplaceLineup { event_id, lineup } => {
                let names: Vec<&str> = lineup.iter().map(|a| a.name.as_str()).collect();
                write!(f, "set lineup of {} to [{}]", event_id, names.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairSummary {
    pub scanned_events: usize,
    pub duplicate_groups: usize,
    pub canonical_updates: usize,
    pub canonical_resets: usize,
    pub lineup_updates: usize,
}

impl RepairSummary {
    fn record(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::PromoteRoot { .. } => self.canonical_resets += 1,
            Mutation::PointAt { .. } => self.canonical_updates += 1,
            Mutation::ReplaceLineup { .. } => self.lineup_updates += 1,
        }
    }

    pub fn total_mutations(&self) -> usize {
        self.canonical_updates + self.canonical_resets + self.lineup_updates
    }
}

impl fmt::Display for RepairSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned events: {}, duplicate slot groups: {}, canonical updates: {}, canonical resets: {}, lineup updates: {}",
            self.scanned_events,
            self.duplicate_groups,
            self.canonical_updates,
            self.canonical_resets,
            self.lineup_updates
        )
    }
}

/// One (venue, date, time) slot and the writes it needs.
#[derive(Debug, Clone)]
pub struct SlotGroup {
    pub venue_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    pub member_ids: Vec<Uuid>,
    pub winner_id: Uuid,
    pub mutations: Vec<Mutation>,
}

#[derive(Debug, Clone)]
pub struct RepairPlan {
    pub groups: Vec<SlotGroup>,
    pub scanned_ids: HashSet<Uuid>,
    pub summary: RepairSummary,
}

impl RepairPlan {
    pub fn mutations(&self) -> impl Iterator<Item = &Mutation> {
        self.groups.iter().flat_map(|g| g.mutations.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.summary.total_mutations() == 0
    }
}

type SlotKey = (Uuid, NaiveDate, String);

fn slot_key(event: &StoredEvent) -> SlotKey {
    (event.venue_id, event.start_date, time_key(event.start_time))
}

fn resolver_score(event: &StoredEvent) -> i32 {
    let bonus = if event.canonical.is_root() { STABILITY_BONUS } else { 0 };
    quality_score(event) + bonus
}

/// Best first: score, then longer title, then higher id.
fn rank(a: &(i32, StoredEvent), b: &(i32, StoredEvent)) -> Ordering {
    b.0.cmp(&a.0)
        .then_with(|| b.1.title.chars().count().cmp(&a.1.title.chars().count()))
        .then_with(|| b.1.id.cmp(&a.1.id))
}

pub struct CanonicalResolver {
    storage: Arc<dyn Storage>,
}

impl CanonicalResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    #[instrument(skip(self))]
    pub async fn plan(&self, scope: &RepairScope) -> Result<RepairPlan> {
        let venues = if scope.venue_slugs.is_empty() {
            self.storage.list_venues().await?
        } else {
            let found = self.storage.get_venues_by_slugs(&scope.venue_slugs).await?;
            for slug in &scope.venue_slugs {
                if !found.iter().any(|v| &v.slug == slug) {
                    warn!(slug = %slug, "Unknown venue slug; skipping");
                }
            }
            found
        };
        let venue_ids: Vec<Uuid> = venues.iter().map(|v| v.id).collect();

        let events = self
            .storage
            .find_events_for_venues_from(&venue_ids, scope.from_date)
            .await?;
        let scanned_ids: HashSet<Uuid> = events.iter().map(|e| e.id).collect();

        let mut slots: BTreeMap<SlotKey, Vec<StoredEvent>> = BTreeMap::new();
        for event in events {
            slots.entry(slot_key(&event)).or_default().push(event);
        }

        let mut summary = RepairSummary {
            scanned_events: scanned_ids.len(),
            ..RepairSummary::default()
        };
        let mut groups = Vec::with_capacity(slots.len());
        for ((venue_id, date, time), members) in slots {
            if members.len() > 1 {
                summary.duplicate_groups += 1;
            }
            let group = self.plan_slot(venue_id, date, time, members, &scanned_ids).await?;
            for mutation in &group.mutations {
                summary.record(mutation);
            }
            groups.push(group);
        }

        info!(%summary, "Planned canonical repair");
        Ok(RepairPlan {
            groups,
            scanned_ids,
            summary,
        })
    }

    async fn plan_slot(
        &self,
        venue_id: Uuid,
        date: NaiveDate,
        time: String,
        members: Vec<StoredEvent>,
        scanned_ids: &HashSet<Uuid>,
    ) -> Result<SlotGroup> {
        let mut ranked: Vec<(i32, StoredEvent)> = members
            .into_iter()
            .map(|e| (resolver_score(&e), e))
            .collect();
        ranked.sort_by(rank);

        let winner = &ranked[0].1;
        let mut mutations = Vec::new();

        if !winner.canonical.is_root() {
            mutations.push(Mutation::PromoteRoot { event_id: winner.id });
        }

        // Any prefix of these writes is chain-free: promote the winner, move rows that
        // point into a demoted member, then demote pointer members before root members.
        for (_, member) in &ranked[1..] {
            for child in self.storage.find_children(member.id).await? {
                if child.id != winner.id && !scanned_ids.contains(&child.id) {
                    mutations.push(Mutation::PointAt {
                        event_id: child.id,
                        root_id: winner.id,
                    });
                }
            }
        }

        let target = CanonicalRef::PointsTo(winner.id);
        let (pointers, roots): (Vec<&StoredEvent>, Vec<&StoredEvent>) = ranked[1..]
            .iter()
            .map(|(_, member)| member)
            .filter(|member| member.canonical != target)
            .partition(|member| !member.canonical.is_root());
        for member in pointers.into_iter().chain(roots) {
            mutations.push(Mutation::PointAt {
                event_id: member.id,
                root_id: winner.id,
            });
        }

        if ranked.len() > 1 {
            let merged = merge_lineups(&winner.title, ranked.iter().map(|(_, e)| e.artists.as_slice()));
            if merged != winner.artists {
                mutations.push(Mutation::ReplaceLineup {
                    event_id: winner.id,
                    lineup: merged,
                });
            }
        }

        if !mutations.is_empty() {
            debug!(
                venue_id = %venue_id,
                date = %date,
                time = %time,
                winner = %winner.id,
                members = ranked.len(),
                mutations = mutations.len(),
                "Slot needs repair"
            );
        }

        Ok(SlotGroup {
            venue_id,
            date,
            time,
            member_ids: ranked.iter().map(|(_, e)| e.id).collect(),
            winner_id: winner.id,
            mutations,
        })
    }

    async fn load_slot(&self, group: &SlotGroup) -> Result<Vec<StoredEvent>> {
        let same_day = self
            .storage
            .find_events_by_venue_date(group.venue_id, group.date)
            .await?;
        Ok(same_day
            .into_iter()
            .filter(|e| time_key(e.start_time) == group.time)
            .collect())
    }

    async fn execute(&self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::PromoteRoot { event_id } => {
                self.storage.set_canonical(*event_id, CanonicalRef::Root).await
            }
            Mutation::PointAt { event_id, root_id } => {
                self.storage
                    .set_canonical(*event_id, CanonicalRef::PointsTo(*root_id))
                    .await
            }
            Mutation::ReplaceLineup { event_id, lineup } => {
                self.storage.replace_event_artists(*event_id, lineup).await
            }
        }
    }

    /// Execute a plan slot by slot. A failed write aborts the pass; earlier writes stay.
    #[instrument(skip(self, plan), fields(groups = plan.groups.len()))]
    pub async fn apply(&self, plan: &RepairPlan) -> Result<RepairSummary> {
        let mut summary = RepairSummary {
            scanned_events: plan.summary.scanned_events,
            ..RepairSummary::default()
        };

        for group in &plan.groups {
            let fresh = self.load_slot(group).await?;
            if fresh.is_empty() {
                continue;
            }
            if fresh.len() > 1 {
                summary.duplicate_groups += 1;
            }

            let replanned = self
                .plan_slot(group.venue_id, group.date, group.time.clone(), fresh, &plan.scanned_ids)
                .await?;
            for mutation in &replanned.mutations {
                self.execute(mutation).await?;
                summary.record(mutation);
                counter!("repair_mutations_total").increment(1);
                debug!(%mutation, "Applied");
            }
        }

        info!(%summary, "Applied canonical repair");
        Ok(summary)
    }
}
