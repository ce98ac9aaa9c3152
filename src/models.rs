use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CandidateEvent {
    pub source: String,
    pub city: Option<String>,
    pub country: Option<String>, // ISO 3166-1 alpha-2
    pub title: String,
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time_known: bool,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time_known: bool,
    pub language: String,
    pub location: String,
    pub original_location: String,
    pub url: String,
    pub attendees: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `[longitude, latitude]`, the order radius queries expect.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    pub fn coordinates(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

impl From<[f64; 2]> for GeoPoint {
    fn from(pair: [f64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

impl From<GeoPoint> for [f64; 2] {
    fn from(point: GeoPoint) -> Self {
        point.coordinates()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub i64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Moderation state of a stored record.
///
/// `Deleted` is terminal and keeps whatever edit bookkeeping the record had
/// when it was soft-deleted. `FullyManual` records were submitted by a person
/// and never take part in ingestion or cleanup.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordState {
    Active,
    Edited { fields: BTreeSet<String> },
    FullyManual,
    Deleted { edited: Option<BTreeSet<String>> },
}

impl RecordState {
    pub fn label(&self) -> &'static str {
        match self {
            RecordState::Active => "active",
            RecordState::Edited { .. } => "edited",
            RecordState::FullyManual => "fully_manual",
            RecordState::Deleted { .. } => "deleted",
        }
    }

    pub fn is_manually_edited(&self) -> bool {
        matches!(
            self,
            RecordState::Edited { .. } | RecordState::Deleted { edited: Some(_) }
        )
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, RecordState::Deleted { .. })
    }

    pub fn is_fully_manual(&self) -> bool {
        matches!(self, RecordState::FullyManual)
    }

    pub fn edited_fields(&self) -> Option<&BTreeSet<String>> {
        match self {
            RecordState::Edited { fields } => Some(fields),
            RecordState::Deleted { edited } => edited.as_ref(),
            _ => None,
        }
    }

    /// Ingestion may only touch records that nobody has curated.
    pub fn accepts_ingestion(&self) -> bool {
        !self.is_deleted() && !self.is_fully_manual() && !self.is_manually_edited()
    }
}

#[derive(Clone, Debug)]
pub struct NewEvent {
    pub event: CandidateEvent,
    pub point: Option<GeoPoint>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub state: RecordState,
}

impl NewEvent {
    pub fn scraped(event: CandidateEvent, point: Option<GeoPoint>, now: DateTime<Utc>) -> Self {
        Self {
            event,
            point,
            verified: true,
            created_at: now,
            created_by: None,
            state: RecordState::Active,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PersistedEvent {
    pub id: EventId,
    pub event: CandidateEvent,
    pub point: Option<GeoPoint>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub state: RecordState,
}

#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("unknown field: {0}")]
    Unknown(String),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl PersistedEvent {
    /// Current value of an editable field, addressed by the name moderators
    /// record in the edited-field list.
    pub fn field_value(&self, name: &str) -> Result<Value, FieldError> {
        if name == "point" {
            return serde_json::to_value(self.point).map_err(|err| FieldError::Invalid {
                field: name.to_string(),
                reason: err.to_string(),
            });
        }
        if name == "verified" {
            return Ok(Value::Bool(self.verified));
        }
        let object = serde_json::to_value(&self.event).map_err(|err| FieldError::Invalid {
            field: name.to_string(),
            reason: err.to_string(),
        })?;
        object
            .get(name)
            .cloned()
            .ok_or_else(|| FieldError::Unknown(name.to_string()))
    }

    pub fn set_field(&mut self, name: &str, value: Value) -> Result<(), FieldError> {
        let invalid = |err: serde_json::Error| FieldError::Invalid {
            field: name.to_string(),
            reason: err.to_string(),
        };
        match name {
            "point" => {
                self.point = serde_json::from_value(value).map_err(invalid)?;
            }
            "verified" => {
                self.verified = serde_json::from_value(value).map_err(invalid)?;
            }
            _ => {
                let mut object = serde_json::to_value(&self.event).map_err(invalid)?;
                let map = object
                    .as_object_mut()
                    .ok_or_else(|| FieldError::Unknown(name.to_string()))?;
                if !map.contains_key(name) {
                    return Err(FieldError::Unknown(name.to_string()));
                }
                map.insert(name.to_string(), value);
                self.event = serde_json::from_value(object).map_err(invalid)?;
            }
        }
        Ok(())
    }
}

pub fn instant_key(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errored: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngestionSummary {
    pub candidates: usize,
    pub duplicates_removed: usize,
    pub geocoded: usize,
    #[serde(flatten)]
    pub reconcile: ReconcileSummary,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub total_checked: usize,
    pub duplicates_found: usize,
    pub events_deleted: usize,
    pub errors: usize,
    pub dry_run: bool,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn candidate(url: &str, title: &str, start: Option<DateTime<Utc>>) -> CandidateEvent {
        CandidateEvent {
            source: "test-source".to_string(),
            city: Some("Berlin".to_string()),
            country: Some("DE".to_string()),
            title: title.to_string(),
            start,
            start_time_known: start.is_some(),
            end: None,
            end_time_known: false,
            language: "de".to_string(),
            location: "Alexanderplatz".to_string(),
            original_location: "Alexanderplatz".to_string(),
            url: url.to_string(),
            attendees: None,
            tags: Vec::new(),
        }
    }

    pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    fn persisted() -> PersistedEvent {
        let now = at(2025, 10, 1, 8, 0);
        PersistedEvent {
            id: EventId(7),
            event: candidate("https://example.org/a", "Demo", Some(at(2025, 10, 23, 14, 0))),
            point: None,
            verified: true,
            created_at: now,
            updated_at: now,
            created_by: None,
            state: RecordState::Active,
        }
    }

    #[test]
    fn point_serializes_as_lon_lat_pair() {
        let value = serde_json::to_value(GeoPoint::new(13.4, 52.5)).unwrap();
        assert_eq!(value, json!([13.4, 52.5]));
    }

    #[test]
    fn field_access_by_name() {
        let mut record = persisted();
        assert_eq!(record.field_value("title").unwrap(), json!("Demo"));
        record.set_field("title", json!("Kundgebung")).unwrap();
        record.set_field("point", json!([13.0, 52.0])).unwrap();
        assert_eq!(record.event.title, "Kundgebung");
        assert_eq!(record.point, Some(GeoPoint::new(13.0, 52.0)));
        assert!(matches!(
            record.set_field("nonsense", json!(1)),
            Err(FieldError::Unknown(_))
        ));
        assert!(matches!(
            record.set_field("attendees", json!("many")),
            Err(FieldError::Invalid { .. })
        ));
    }

    #[test]
    fn only_active_records_accept_ingestion() {
        let fields: BTreeSet<String> = ["title".to_string()].into_iter().collect();
        assert!(RecordState::Active.accepts_ingestion());
        assert!(!RecordState::Edited {
            fields: fields.clone()
        }
        .accepts_ingestion());
        assert!(!RecordState::FullyManual.accepts_ingestion());
        let deleted = RecordState::Deleted {
            edited: Some(fields),
        };
        assert!(!deleted.accepts_ingestion());
        assert!(deleted.is_deleted() && deleted.is_manually_edited());

        let removed_untouched = RecordState::Deleted { edited: None };
        assert!(!removed_untouched.accepts_ingestion());
        assert!(!removed_untouched.is_manually_edited());
        assert!(RecordState::FullyManual.is_fully_manual());
        assert!(!RecordState::FullyManual.is_manually_edited());
    }
}
