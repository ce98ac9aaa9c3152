use anyhow::{anyhow, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::base::{self, Announcement};
use super::{Horizon, SourceAdapter};
use crate::attendees::extract_attendees;
use crate::http::HttpClient;
use crate::locale;
use crate::models::CandidateEvent;

const URL: &str = "https://stadt.muenchen.de/infos/versammlungen.html";
const SOURCE_ID: &str = "munich-kvr";
const SOURCE_NAME: &str = "KVR München – Versammlungen";
const COUNTRY: &str = "DE";

static TABLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table").expect("munich table selector"));
static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("munich row"));
static HEADER_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("th").expect("munich header cell"));
static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("munich cell"));
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("munich link"));

/// Column positions resolved from the header row.
#[derive(Debug, Default)]
struct Columns {
    date: Option<usize>,
    time: Option<usize>,
    topic: Option<usize>,
    place: Option<usize>,
    attendees: Option<usize>,
}

impl Columns {
    fn from_labels(labels: &[String]) -> Self {
        let mut columns = Columns::default();
        for (index, label) in labels.iter().enumerate() {
            let label = label.to_lowercase();
            let slot = if label.contains("datum") {
                &mut columns.date
            } else if label.contains("zeit") {
                &mut columns.time
            } else if label.contains("thema") || label.contains("motto") {
                &mut columns.topic
            } else if label.contains("ort") || label.contains("treffpunkt") {
                &mut columns.place
            } else if label.contains("teilnehm") {
                &mut columns.attendees
            } else {
                continue;
            };
            slot.get_or_insert(index);
        }
        columns
    }

    fn is_usable(&self) -> bool {
        self.date.is_some() && self.topic.is_some()
    }
}

pub struct MunichKvr;

#[async_trait]
impl SourceAdapter for MunichKvr {
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

    async fn fetch(&self, http: &HttpClient, horizon: Horizon) -> Result<Vec<CandidateEvent>> {
        let html = http.get_text(URL).await?;
        parse_document(&html, &horizon)
    }
}

pub(crate) fn parse_document(html: &str, horizon: &Horizon) -> Result<Vec<CandidateEvent>> {
    let locale = locale::require_locale(COUNTRY, SOURCE_ID)?;
    let document = Html::parse_document(html);
    let mut events = Vec::new();
    let mut saw_table = false;

    for table in document.select(&TABLE_SELECTOR) {
        let labels: Vec<String> = table.select(&HEADER_SELECTOR).map(base::inner_text).collect();
        let columns = Columns::from_labels(&labels);
        if !columns.is_usable() {
            continue;
        }
        saw_table = true;

        for row in table.select(&ROW_SELECTOR) {
            let cells: Vec<ElementRef<'_>> = row.select(&CELL_SELECTOR).collect();
            if cells.is_empty() {
                continue;
            }
            let text_at = |slot: Option<usize>| {
                slot.and_then(|index| cells.get(index))
                    .map(|cell| base::inner_text(*cell))
                    .unwrap_or_default()
            };

            let date_text = text_at(columns.date);
            let topic = text_at(columns.topic);
            let place = text_at(columns.place);
            let (time_text, end_text) = match text_at(columns.time) {
                time if time.is_empty() => (None, None),
                time => {
                    let (start, end) = base::split_time_range(&time);
                    (Some(start), end)
                }
            };

            let link = cells
                .iter()
                .find_map(|cell| base::first_attr(cell, &LINK_SELECTOR, "href"));
            let url = base::absolute_url(URL, link).unwrap_or_else(|| {
                base::stable_anchor(URL, &[date_text.as_str(), topic.as_str(), place.as_str()])
            });

            let announcement = Announcement {
                title: topic,
                date_text,
                time_text,
                end_text,
                location: place,
                city: Some("München".to_string()),
                url,
                ..Announcement::default()
            };
            let Some(mut event) = base::build_candidate(SOURCE_ID, locale, announcement, horizon)
            else {
                continue;
            };
            let headcount = text_at(columns.attendees);
            if !headcount.is_empty() {
                let phrase = format!("{headcount} Teilnehmende");
                event.attendees = extract_attendees(&phrase, locale, None).or(event.attendees);
            }
            events.push(event);
        }
    }

    if !saw_table {
        return Err(anyhow!("no assembly table found on {URL}"));
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::at;

    const SAMPLE: &str = r#"
    <html><body>
      <table class="layout"><tr><td>Navigation</td></tr></table>
      <table class="versammlungen">
        <thead>
          <tr><th>Datum</th><th>Uhrzeit</th><th>Thema / Motto</th><th>Versammlungsort</th><th>Teilnehmerzahl</th></tr>
        </thead>
        <tbody>
          <tr>
            <td>Do., 23.10.2025</td><td>14:00 - 16:00 Uhr</td>
            <td><a href="/infos/versammlung/123">Klimastreik München</a></td>
            <td>Königsplatz</td><td>ca. 1.500</td>
          </tr>
          <tr>
            <td>25. Oktober 2025</td><td>ab 11.30 Uhr</td>
            <td>Mahnwache für Frieden</td><td>Marienplatz</td><td>50</td>
          </tr>
          <tr>
            <td>bald</td><td>10:00</td><td>Ohne Datum</td><td>Odeonsplatz</td><td></td>
          </tr>
        </tbody>
      </table>
    </body></html>
    "#;

    fn horizon() -> Horizon {
        Horizon::new(at(2025, 10, 14, 9, 0), 90)
    }

    #[test]
    fn maps_columns_from_header_labels() {
        let events = parse_document(SAMPLE, &horizon()).unwrap();
        assert_eq!(events.len(), 2);

        let strike = &events[0];
        assert_eq!(strike.title, "Klimastreik München");
        assert_eq!(strike.start, Some(at(2025, 10, 23, 12, 0)));
        assert_eq!(strike.end, Some(at(2025, 10, 23, 14, 0)));
        assert_eq!(strike.location, "Königsplatz");
        assert_eq!(strike.url, "https://stadt.muenchen.de/infos/versammlung/123");
        assert_eq!(strike.attendees, Some(1500));

        let vigil = &events[1];
        assert_eq!(vigil.start, Some(at(2025, 10, 25, 9, 30)));
        assert!(vigil.start_time_known);
        assert_eq!(vigil.attendees, Some(50));
        assert!(vigil.url.starts_with(&format!("{URL}#")));
    }

    #[test]
    fn row_anchor_is_stable_across_runs() {
        let first = parse_document(SAMPLE, &horizon()).unwrap();
        let second = parse_document(SAMPLE, &horizon()).unwrap();
        assert_eq!(first[1].url, second[1].url);
    }

    #[test]
    fn page_without_table_is_an_error() {
        assert!(parse_document("<html><p>Wartung</p></html>", &horizon()).is_err());
    }
}
