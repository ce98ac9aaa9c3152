use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::base::{self, Announcement};
use super::{Horizon, SourceAdapter};
use crate::http::HttpClient;
use crate::locale;
use crate::models::CandidateEvent;

const URL: &str = "https://www.berlin.de/polizei/service/versammlungsbehoerde/versammlungen-aufzuege/index.php/index/all.json?q=";
const DETAIL_BASE: &str =
    "https://www.berlin.de/polizei/service/versammlungsbehoerde/versammlungen-aufzuege/index.php/detail";
const SOURCE_ID: &str = "berlin-police";
const SOURCE_NAME: &str = "Polizei Berlin – Versammlungsbehörde";
const COUNTRY: &str = "DE";

#[derive(Debug, Deserialize)]
struct IndexDoc {
    #[serde(default)]
    index: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AssemblyRow {
    id: Value,
    datum: String,
    #[serde(default)]
    von: Option<String>,
    #[serde(default)]
    bis: Option<String>,
    thema: String,
    #[serde(default)]
    plz: Option<String>,
    #[serde(default)]
    strasse_nr: Option<String>,
    #[serde(default)]
    aufzugsstrecke: Option<String>,
}

pub struct BerlinPolice;

#[async_trait]
impl SourceAdapter for BerlinPolice {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn source_url(&self) -> &'static str {
        URL
    }

    fn country(&self) -> &'static str {
        COUNTRY
    }

    fn request_delay(&self) -> Duration {
        Duration::from_secs(2)
    }

    async fn fetch(&self, http: &HttpClient, horizon: Horizon) -> Result<Vec<CandidateEvent>> {
        let body = http.get_text(URL).await?;
        parse_index(&body, &horizon)
    }
}

/// Rows that fail to decode or normalize are skipped individually.
pub(crate) fn parse_index(body: &str, horizon: &Horizon) -> Result<Vec<CandidateEvent>> {
    let locale = locale::require_locale(COUNTRY, SOURCE_ID)?;
    let doc: IndexDoc = serde_json::from_str(body).context("berlin index is not valid json")?;
    let mut events = Vec::new();

    for raw in doc.index {
        let row: AssemblyRow = match serde_json::from_value(raw) {
            Ok(row) => row,
            Err(err) => {
                tracing::debug!(source = SOURCE_ID, "skipping malformed row: {err}");
                continue;
            }
        };
        let Some(id) = row_id(&row.id) else {
            continue;
        };
        // House numbers on the route look like headcount ranges, so it only
        // decides the tag.
        let is_march = row
            .aufzugsstrecke
            .as_deref()
            .is_some_and(|route| !base::clean_text(route).is_empty());

        let announcement = Announcement {
            title: row.thema,
            date_text: row.datum,
            time_text: row.von.filter(|v| !v.trim().is_empty()),
            end_text: row.bis.filter(|v| !v.trim().is_empty()),
            location: location_of(row.strasse_nr.as_deref(), row.plz.as_deref()),
            city: Some("Berlin".to_string()),
            url: format!("{DETAIL_BASE}/{id}"),
            ..Announcement::default()
        };
        if let Some(mut event) = base::build_candidate(SOURCE_ID, locale, announcement, horizon) {
            event.tags = vec![if is_march { "march" } else { "rally" }.to_string()];
            events.push(event);
        }
    }

    Ok(events)
}

fn row_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn location_of(street: Option<&str>, postcode: Option<&str>) -> String {
    let street = street.map(base::clean_text).unwrap_or_default();
    let postcode = postcode.map(base::clean_text).unwrap_or_default();
    match (street.is_empty(), postcode.is_empty()) {
        (false, false) => format!("{street}, {postcode} Berlin"),
        (false, true) => street,
        (true, false) => format!("{postcode} Berlin"),
        (true, true) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::at;

    const SAMPLE: &str = r#"{
        "index": [
            {"id": 4711, "datum": "23.10.2025", "von": "14:00", "bis": "16:00",
             "thema": "Solidarität mit der Ukraine", "plz": "10117",
             "strasse_nr": "Pariser Platz", "aufzugsstrecke": ""},
            {"id": "4712", "datum": "2025-10-25", "von": "11:00", "bis": "",
             "thema": "Fahrraddemo: Verkehrswende jetzt", "plz": "10178",
             "strasse_nr": "Alexanderplatz",
             "aufzugsstrecke": "Alexanderplatz - Karl-Liebknecht-Str. - Unter den Linden"},
            {"id": 4713, "datum": "irgendwann", "von": "10:00", "thema": "Kaputt"},
            {"id": 4714, "thema": "Ohne Datum"},
            {"id": 4715, "datum": "23.03.2026", "von": "10:00", "thema": "Zu weit weg"}
        ]
    }"#;

    fn horizon() -> Horizon {
        Horizon::new(at(2025, 10, 14, 9, 0), 90)
    }

    #[test]
    fn parses_rows_and_skips_broken_ones() {
        let events = parse_index(SAMPLE, &horizon()).unwrap();
        assert_eq!(events.len(), 2);

        let first = &events[0];
        assert_eq!(first.title, "Solidarität mit der Ukraine");
        assert_eq!(first.start, Some(at(2025, 10, 23, 12, 0)));
        assert_eq!(first.end, Some(at(2025, 10, 23, 14, 0)));
        assert_eq!(first.location, "Pariser Platz, 10117 Berlin");
        assert_eq!(first.city.as_deref(), Some("Berlin"));
        assert_eq!(first.url, format!("{DETAIL_BASE}/4711"));
        assert_eq!(first.tags, vec!["rally".to_string()]);

        let second = &events[1];
        assert_eq!(second.start, Some(at(2025, 10, 25, 9, 0)));
        assert!(second.end.is_none());
        assert_eq!(second.tags, vec!["march".to_string()]);
        assert_eq!(second.url, format!("{DETAIL_BASE}/4712"));
    }

    #[test]
    fn numbered_route_is_not_a_headcount() {
        let body = r#"{"index": [
            {"id": 4720, "datum": "25.10.2025", "von": "13:00",
             "thema": "Mietenwahnsinn stoppen", "strasse_nr": "Karl-Marx-Allee 1-3",
             "aufzugsstrecke": "Karl-Marx-Allee 1-3 - Strausberger Platz"}
        ]}"#;
        let events = parse_index(body, &horizon()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attendees, None);
        assert_eq!(events[0].tags, vec!["march".to_string()]);
    }

    #[test]
    fn invalid_document_is_an_error() {
        assert!(parse_index("<html>maintenance</html>", &horizon()).is_err());
        assert!(parse_index("{}", &horizon()).unwrap().is_empty());
    }
}
