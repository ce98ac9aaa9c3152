use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;

use super::base::{self, Announcement};
use super::{Horizon, SourceAdapter};
use crate::http::HttpClient;
use crate::locale::{self, LocaleConfig};
use crate::models::CandidateEvent;

const URL: &str = "https://paris.demosphere.net/";
const SOURCE_ID: &str = "demosphere-paris";
const SOURCE_NAME: &str = "Demosphere Paris";
const COUNTRY: &str = "FR";
const DEFAULT_CITY: &str = "Paris";

static ITEM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("li.event").expect("demosphere item selector"));
static DATE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".date").expect("demosphere date"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".title a").expect("demosphere title"));
static PLACE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".place").expect("demosphere place"));
static DESCRIPTION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".description").expect("demosphere description"));

pub struct DemosphereParis;

#[async_trait]
impl SourceAdapter for DemosphereParis {
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

/// Embedded event metadata wins; the list markup is read only when the page
/// carries none.
pub(crate) fn parse_document(html: &str, horizon: &Horizon) -> Result<Vec<CandidateEvent>> {
    let locale = locale::require_locale(COUNTRY, SOURCE_ID)?;
    let document = Html::parse_document(html);

    let structured = base::json_ld_events(&document);
    if !structured.is_empty() {
        return Ok(structured
            .iter()
            .filter_map(|item| from_json_ld(item, locale))
            .filter_map(|announcement| {
                base::build_candidate(SOURCE_ID, locale, announcement, horizon)
            })
            .collect());
    }

    tracing::debug!(source = SOURCE_ID, "no structured data, reading list markup");
    let mut events = Vec::new();
    for item in document.select(&ITEM_SELECTOR) {
        let Some(title) = base::first_text(&item, &TITLE_SELECTOR) else {
            continue;
        };
        let Some(date_text) = base::first_text(&item, &DATE_SELECTOR) else {
            continue;
        };
        let Some(url) = base::absolute_url(URL, base::first_attr(&item, &TITLE_SELECTOR, "href"))
        else {
            continue;
        };
        let announcement = Announcement {
            title,
            date_text,
            location: base::first_text(&item, &PLACE_SELECTOR).unwrap_or_default(),
            city: Some(DEFAULT_CITY.to_string()),
            url,
            description: base::first_text(&item, &DESCRIPTION_SELECTOR).unwrap_or_default(),
            ..Announcement::default()
        };
        if let Some(event) = base::build_candidate(SOURCE_ID, locale, announcement, horizon) {
            events.push(event);
        }
    }
    Ok(events)
}

fn from_json_ld(item: &Value, locale: &LocaleConfig) -> Option<Announcement> {
    let title = base::json_ld_text(item, "name")?;
    let start_raw = item.get("startDate")?.as_str()?;
    let start = base::parse_iso_date(start_raw, locale);
    let end = item
        .get("endDate")
        .and_then(Value::as_str)
        .and_then(|raw| base::parse_iso_date(raw, locale));
    let url = base::absolute_url(URL, base::json_ld_text(item, "url"))?;
    let (location, city) = place_of(item.get("location"));

    Some(Announcement {
        title,
        date_text: start_raw.to_string(),
        start,
        end,
        location,
        city: Some(city.unwrap_or_else(|| DEFAULT_CITY.to_string())),
        url,
        description: base::json_ld_text(item, "description").unwrap_or_default(),
        ..Announcement::default()
    })
}

/// Venue text and locality from a schema.org `Place` (or a bare string).
fn place_of(location: Option<&Value>) -> (String, Option<String>) {
    let Some(location) = location else {
        return (String::new(), None);
    };
    if let Some(text) = location.as_str() {
        return (base::clean_text(text), None);
    }
    let name = base::json_ld_text(location, "name");
    let (street, city) = match location.get("address") {
        Some(Value::String(address)) => (Some(base::clean_text(address)), None),
        Some(address) => (
            base::json_ld_text(address, "streetAddress"),
            base::json_ld_text(address, "addressLocality"),
        ),
        None => (None, None),
    };
    let text = match (name, street) {
        (Some(name), Some(street)) if name != street => format!("{name}, {street}"),
        (Some(name), _) => name,
        (None, Some(street)) => street,
        (None, None) => String::new(),
    };
    (text, city)
}
