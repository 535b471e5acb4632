use super::{merge_images, merge_links, sort_events, InsertOutcome, Storage};
use crate::differ::EventPatch;
use crate::error::{IngestError, Result};
use crate::lineup::merge_lineups;
use crate::types::{
    fold_venue_name, CanonicalRef, EventArtist, EventLink, FieldSource, ImageRef, Notification,
    StoredEvent, Venue,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// SQLite-backed catalog.
///
/// Events are stored as a JSON document next to the columns the gateway queries on;
/// `content_hash` carries a UNIQUE constraint so concurrent inserts of one event
/// cannot both succeed.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    CREATE TABLE IF NOT EXISTS venues (
        id           TEXT PRIMARY KEY,
        name         TEXT NOT NULL,
        name_folded  TEXT NOT NULL UNIQUE,
        slug         TEXT NOT NULL,
        created_at   TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS events (
        id                  TEXT PRIMARY KEY,
        content_hash        TEXT NOT NULL UNIQUE,
        venue_id            TEXT NOT NULL,
        start_date          TEXT NOT NULL,
        canonical_event_id  TEXT,
        data                TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_events_venue_date ON events (venue_id, start_date);
    CREATE INDEX IF NOT EXISTS idx_events_canonical ON events (canonical_event_id);
    CREATE TABLE IF NOT EXISTS notifications (
        id          TEXT PRIMARY KEY,
        event_id    TEXT NOT NULL,
        data        TEXT NOT NULL,
        created_at  TEXT NOT NULL
    );
"#;

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| IngestError::storage(format!("bad uuid {}: {}", raw, e)))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| IngestError::storage(format!("bad timestamp {}: {}", raw, e)))
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn decode_events(docs: Vec<String>) -> Result<Vec<StoredEvent>> {
    let mut events = Vec::with_capacity(docs.len());
    for doc in docs {
        events.push(serde_json::from_str(&doc)?);
    }
    Ok(sort_events(events))
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened catalog database at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IngestError::storage("sqlite connection lock poisoned"))
    }

    pub fn notifications(&self) -> Result<Vec<Notification>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT data FROM notifications ORDER BY created_at, id")?;
        let mut rows = stmt.query([])?;
        let mut notifications = Vec::new();
        while let Some(row) = rows.next()? {
            let doc: String = row.get(0)?;
            notifications.push(serde_json::from_str(&doc)?);
        }
        Ok(notifications)
    }

    fn select_docs(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(args)?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next()? {
            docs.push(row.get(0)?);
        }
        Ok(docs)
    }

    fn load_event(conn: &Connection, event_id: Uuid) -> Result<Option<StoredEvent>> {
        let doc: Option<String> = conn
            .query_row(
                "SELECT data FROM events WHERE id = ?1",
                params![event_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match doc {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    fn write_event(conn: &Connection, event: &StoredEvent) -> Result<usize> {
        let changed = conn.execute(
            "UPDATE events SET content_hash = ?2, venue_id = ?3, start_date = ?4,
                    canonical_event_id = ?5, data = ?6
             WHERE id = ?1",
            params![
                event.id.to_string(),
                event.content_hash,
                event.venue_id.to_string(),
                date_key(event.start_date),
                event.canonical.canonical_event_id().map(|id| id.to_string()),
                serde_json::to_string(event)?,
            ],
        )?;
        Ok(changed)
    }

    /// Read-modify-write of one event under the connection lock.
    fn modify_event<F>(&self, event_id: Uuid, f: F) -> Result<StoredEvent>
    where
        F: FnOnce(&mut StoredEvent),
    {
        let conn = self.conn()?;
        let mut event = Self::load_event(&conn, event_id)?
            .ok_or_else(|| IngestError::NotFound(format!("event {}", event_id)))?;
        f(&mut event);
        event.updated_at = Utc::now();
        Self::write_event(&conn, &event)?;
        Ok(event)
    }

    fn venue_from_row(row: &rusqlite::Row<'_>) -> Result<Venue> {
        let id: String = row.get(0)?;
        let created_at: String = row.get(4)?;
        Ok(Venue {
            id: parse_uuid(&id)?,
            name: row.get(1)?,
            name_folded: row.get(2)?,
            slug: row.get(3)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn resolve_or_create_venue(&self, name: &str) -> Result<Venue> {
        let folded = fold_venue_name(name);
        if folded.is_empty() {
            return Err(IngestError::MissingField("venue name".to_string()));
        }

        let conn = self.conn()?;
        let candidate = Venue::new(name);
        let inserted = conn.execute(
            "INSERT INTO venues (id, name, name_folded, slug, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name_folded) DO NOTHING",
            params![
                candidate.id.to_string(),
                candidate.name,
                candidate.name_folded,
                candidate.slug,
                candidate.created_at.to_rfc3339(),
            ],
        )?;
        if inserted > 0 {
            debug!("Created venue: {} with id {}", candidate.name, candidate.id);
        }

        let mut stmt = conn.prepare(
            "SELECT id, name, name_folded, slug, created_at FROM venues WHERE name_folded = ?1",
        )?;
        let mut rows = stmt.query(params![folded])?;
        match rows.next()? {
            Some(row) => Self::venue_from_row(row),
            None => Err(IngestError::storage(format!("venue {} vanished after upsert", folded))),
        }
    }

    async fn get_venue(&self, venue_id: Uuid) -> Result<Option<Venue>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, name, name_folded, slug, created_at FROM venues WHERE id = ?1")?;
        let mut rows = stmt.query(params![venue_id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::venue_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    async fn list_venues(&self) -> Result<Vec<Venue>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, name_folded, slug, created_at FROM venues ORDER BY slug")?;
        let mut rows = stmt.query([])?;
        let mut venues = Vec::new();
        while let Some(row) = rows.next()? {
            venues.push(Self::venue_from_row(row)?);
        }
        Ok(venues)
    }

    async fn get_venues_by_slugs(&self, slugs: &[String]) -> Result<Vec<Venue>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, name_folded, slug, created_at FROM venues WHERE slug = ?1",
        )?;
        let mut venues = Vec::new();
        for slug in slugs {
            let mut rows = stmt.query(params![slug])?;
            while let Some(row) = rows.next()? {
                venues.push(Self::venue_from_row(row)?);
            }
        }
        venues.sort_by(|a, b| a.slug.cmp(&b.slug));
        venues.dedup_by(|a, b| a.id == b.id);
        Ok(venues)
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>> {
        let conn = self.conn()?;
        Self::load_event(&conn, event_id)
    }

    async fn find_event_by_hash(&self, content_hash: &str) -> Result<Option<StoredEvent>> {
        let conn = self.conn()?;
        let docs = Self::select_docs(
            &conn,
            "SELECT data FROM events WHERE content_hash = ?1",
            &[&content_hash],
        )?;
        Ok(decode_events(docs)?.into_iter().next())
    }

    async fn find_events_by_venue_date(
        &self,
        venue_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<StoredEvent>> {
        let conn = self.conn()?;
        let docs = Self::select_docs(
            &conn,
            "SELECT data FROM events WHERE venue_id = ?1 AND start_date = ?2",
            &[&venue_id.to_string(), &date_key(date)],
        )?;
        decode_events(docs)
    }

    async fn find_events_for_venues_from(
        &self,
        venue_ids: &[Uuid],
        from_date: NaiveDate,
    ) -> Result<Vec<StoredEvent>> {
        let conn = self.conn()?;
        let mut docs = Vec::new();
        for venue_id in venue_ids {
            docs.extend(Self::select_docs(
                &conn,
                "SELECT data FROM events WHERE venue_id = ?1 AND start_date >= ?2",
                &[&venue_id.to_string(), &date_key(from_date)],
            )?);
        }
        decode_events(docs)
    }

    async fn find_children(&self, root_id: Uuid) -> Result<Vec<StoredEvent>> {
        let conn = self.conn()?;
        let docs = Self::select_docs(
            &conn,
            "SELECT data FROM events WHERE canonical_event_id = ?1",
            &[&root_id.to_string()],
        )?;
        decode_events(docs)
    }

    async fn insert_event(&self, event: &StoredEvent) -> Result<InsertOutcome> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO events (id, content_hash, venue_id, start_date, canonical_event_id, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(content_hash) DO NOTHING",
            params![
                event.id.to_string(),
                event.content_hash,
                event.venue_id.to_string(),
                date_key(event.start_date),
                event.canonical.canonical_event_id().map(|id| id.to_string()),
                serde_json::to_string(event)?,
            ],
        )?;

        if inserted > 0 {
            debug!("Created event: {} with id {}", event.title, event.id);
            return Ok(InsertOutcome::Inserted(event.id));
        }

        let docs = Self::select_docs(
            &conn,
            "SELECT data FROM events WHERE content_hash = ?1",
            &[&event.content_hash],
        )?;
        match decode_events(docs)?.into_iter().next() {
            Some(existing) => {
                debug!("Hash {} already held by event {}", event.content_hash, existing.id);
                Ok(InsertOutcome::Duplicate(existing))
            }
            None => Err(IngestError::storage(format!(
                "insert of {} ignored without a conflicting row",
                event.id
            ))),
        }
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
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notifications (id, event_id, data, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                notification.id.to_string(),
                notification.event_id.to_string(),
                serde_json::to_string(notification)?,
                notification.created_at.to_rfc3339(),
            ],
        )?;
        debug!("Created notification {} for event {}", notification.id, notification.event_id);
        Ok(())
    }
}
