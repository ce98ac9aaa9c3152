use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{
    instant_key, CandidateEvent, EventId, GeoPoint, NewEvent, PersistedEvent, RecordState,
};
use crate::utils;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarityKey {
    pub url: String,
    pub title: String,
    pub city: Option<String>,
    pub source: String,
}

impl SimilarityKey {
    pub fn of(event: &CandidateEvent) -> Self {
        Self {
            url: event.url.clone(),
            title: event.title.clone(),
            city: event.city.clone(),
            source: event.source.clone(),
        }
    }
}

/// The primitives the pipeline needs from persistent storage. Every method
/// is a single-record (or read-only) operation, atomic from the caller's side.
pub trait EventStore {
    fn find_by_url_and_start(
        &self,
        url: &str,
        start: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PersistedEvent>>;
    fn get(&self, id: EventId) -> StoreResult<Option<PersistedEvent>>;
    fn insert(&self, record: &NewEvent) -> StoreResult<EventId>;
    /// Rewrites every mutable column of `record`. The creation timestamp is
    /// never written.
    fn update(&self, record: &PersistedEvent) -> StoreResult<()>;
    /// Records eligible for duplicate cleanup, oldest first.
    fn cleanup_scan(&self) -> StoreResult<Vec<PersistedEvent>>;
    /// Cleanup-eligible records sharing `key` whose start lies within
    /// `window` of `start`, or whose start is also unknown.
    fn find_similar(
        &self,
        key: &SimilarityKey,
        start: Option<DateTime<Utc>>,
        window: Duration,
    ) -> StoreResult<Vec<PersistedEvent>>;
    fn delete(&self, id: EventId) -> StoreResult<()>;
}

pub struct SqliteStore {
    conn: Connection,
}

const SELECT_COLUMNS: &str = "id, payload, longitude, latitude, verified, created_at, updated_at,
     created_by, state, edited_fields";

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        utils::ensure_parent(path);
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                url TEXT NOT NULL,
                start_utc TEXT,
                title TEXT NOT NULL,
                city TEXT,
                payload TEXT NOT NULL,
                longitude REAL,
                latitude REAL,
                verified INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                created_by TEXT,
                state TEXT NOT NULL,
                edited_fields TEXT
            );
            CREATE INDEX IF NOT EXISTS events_url_start ON events(url, start_utc);
            CREATE INDEX IF NOT EXISTS events_similarity
                ON events(url, title, city, source, start_utc);
            CREATE INDEX IF NOT EXISTS events_created ON events(created_at);",
        )?;
        Ok(())
    }

    fn query_events<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> StoreResult<Vec<PersistedEvent>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawRow::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_event()?);
        }
        Ok(out)
    }
}

/// Column values as read, decoded into a [`PersistedEvent`] afterwards so
/// payload errors surface as [`StoreError`] rather than sqlite conversions.
struct RawRow {
    id: i64,
    payload: String,
    longitude: Option<f64>,
    latitude: Option<f64>,
    verified: bool,
    created_at: String,
    updated_at: String,
    created_by: Option<String>,
    state: String,
    edited_fields: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload: row.get(1)?,
            longitude: row.get(2)?,
            latitude: row.get(3)?,
            verified: row.get::<_, i64>(4)? != 0,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            created_by: row.get(7)?,
            state: row.get(8)?,
            edited_fields: row.get(9)?,
        })
    }

    fn into_event(self) -> StoreResult<PersistedEvent> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: self.id,
            reason,
        };
        let event: CandidateEvent = serde_json::from_str(&self.payload)?;
        let fields: Option<BTreeSet<String>> = match &self.edited_fields {
            Some(raw) => Some(serde_json::from_str(raw)?),
            None => None,
        };
        let state = match self.state.as_str() {
            "active" => RecordState::Active,
            "edited" => RecordState::Edited {
                fields: fields.unwrap_or_default(),
            },
            "fully_manual" => RecordState::FullyManual,
            "deleted" => RecordState::Deleted { edited: fields },
            other => return Err(corrupt(format!("unknown state {other}"))),
        };
        let point = match (self.longitude, self.latitude) {
            (Some(lon), Some(lat)) => Some(GeoPoint::new(lon, lat)),
            _ => None,
        };
        let created_at = parse_instant(&self.created_at).map_err(&corrupt)?;
        let updated_at = parse_instant(&self.updated_at).map_err(&corrupt)?;
        Ok(PersistedEvent {
            id: EventId(self.id),
            event,
            point,
            verified: self.verified,
            created_at,
            updated_at,
            created_by: self.created_by,
            state,
        })
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| format!("bad timestamp {raw}: {err}"))
}

fn edited_fields_json(state: &RecordState) -> StoreResult<Option<String>> {
    Ok(match state.edited_fields() {
        Some(fields) => Some(serde_json::to_string(fields)?),
        None => None,
    })
}

impl EventStore for SqliteStore {
    fn find_by_url_and_start(
        &self,
        url: &str,
        start: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<PersistedEvent>> {
        let start = start.as_ref().map(instant_key);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM events WHERE url = ?1 AND start_utc IS ?2
             ORDER BY created_at ASC, id ASC LIMIT 1"
        );
        Ok(self.query_events(&sql, params![url, start])?.into_iter().next())
    }

    fn get(&self, id: EventId) -> StoreResult<Option<PersistedEvent>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM events WHERE id = ?1");
        let raw = self
            .conn
            .query_row(&sql, params![id.0], RawRow::from_row)
            .optional()?;
        raw.map(RawRow::into_event).transpose()
    }

    fn insert(&self, record: &NewEvent) -> StoreResult<EventId> {
        let payload = serde_json::to_string(&record.event)?;
        let created = instant_key(&record.created_at);
        self.conn.execute(
            "INSERT INTO events (source, url, start_utc, title, city, payload, longitude,
                latitude, verified, created_at, updated_at, created_by, state, edited_fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?11, ?12, ?13)",
            params![
                record.event.source,
                record.event.url,
                record.event.start.as_ref().map(instant_key),
                record.event.title,
                record.event.city,
                payload,
                record.point.map(|p| p.longitude),
                record.point.map(|p| p.latitude),
                record.verified,
                created,
                record.created_by,
                record.state.label(),
                edited_fields_json(&record.state)?,
            ],
        )?;
        Ok(EventId(self.conn.last_insert_rowid()))
    }

    fn update(&self, record: &PersistedEvent) -> StoreResult<()> {
        let payload = serde_json::to_string(&record.event)?;
        self.conn.execute(
            "UPDATE events SET source = ?2, url = ?3, start_utc = ?4, title = ?5, city = ?6,
                payload = ?7, longitude = ?8, latitude = ?9, verified = ?10, updated_at = ?11,
                created_by = ?12, state = ?13, edited_fields = ?14
             WHERE id = ?1",
            params![
                record.id.0,
                record.event.source,
                record.event.url,
                record.event.start.as_ref().map(instant_key),
                record.event.title,
                record.event.city,
                payload,
                record.point.map(|p| p.longitude),
                record.point.map(|p| p.latitude),
                record.verified,
                instant_key(&record.updated_at),
                record.created_by,
                record.state.label(),
                edited_fields_json(&record.state)?,
            ],
        )?;
        Ok(())
    }

    fn cleanup_scan(&self) -> StoreResult<Vec<PersistedEvent>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM events
             WHERE state NOT IN ('deleted', 'fully_manual')
             ORDER BY created_at ASC, id ASC"
        );
        self.query_events(&sql, [])
    }

    fn find_similar(
        &self,
        key: &SimilarityKey,
        start: Option<DateTime<Utc>>,
        window: Duration,
    ) -> StoreResult<Vec<PersistedEvent>> {
        let base = format!(
            "SELECT {SELECT_COLUMNS} FROM events
             WHERE url = ?1 AND title = ?2 AND city IS ?3 AND source = ?4
               AND state NOT IN ('deleted', 'fully_manual')"
        );
        match start {
            Some(start) => {
                let sql = format!(
                    "{base} AND start_utc BETWEEN ?5 AND ?6 ORDER BY created_at ASC, id ASC"
                );
                self.query_events(
                    &sql,
                    params![
                        key.url,
                        key.title,
                        key.city,
                        key.source,
                        instant_key(&(start - window)),
                        instant_key(&(start + window)),
                    ],
                )
            }
            None => {
                let sql = format!("{base} AND start_utc IS NULL ORDER BY created_at ASC, id ASC");
                self.query_events(&sql, params![key.url, key.title, key.city, key.source])
            }
        }
    }

    fn delete(&self, id: EventId) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM events WHERE id = ?1", params![id.0])?;
        Ok(())
    }
}
