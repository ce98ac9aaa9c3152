use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::Horizon;
use crate::attendees::extract_attendees;
use crate::dates::{self, normalize_date_at, NormalizedDate};
use crate::locale::LocaleConfig;
use crate::models::CandidateEvent;

static JSON_LD_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("json-ld selector")
});
static TIME_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d{1,2}(?:[:.h]\d{2})?)\s*(?:Uhr\s*)?(?:-|–|bis|à)\s*(\d{1,2}(?:[:.h]\d{2})?)")
        .expect("valid time range regex")
});
static MARCH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(aufzug|demonstrationszug|umzug|marche|manifestation|march|parade|optocht)\b")
        .expect("valid march regex")
});

pub fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element.select(selector).next().and_then(|node| {
        let cleaned = inner_text(node);
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    })
}

pub fn inner_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

pub fn first_attr(element: &ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
}

pub fn absolute_url(base: &str, href: Option<String>) -> Option<String> {
    let href = href?;
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href);
    }
    let base_url = reqwest::Url::parse(base).ok()?;
    base_url.join(&href).ok().map(|u| u.to_string())
}

/// Deterministic fragment for rows that carry no link of their own, so the
/// same announcement maps to the same URL on every run.
pub fn stable_anchor(base_url: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            hasher.update(b"|");
        }
        hasher.update(clean_text(part).to_lowercase().as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{base_url}#{}", &digest[..16])
}

#[derive(Debug, Clone, Default)]
pub struct Announcement {
    pub title: String,
    pub date_text: String,
    pub time_text: Option<String>,
    pub end_text: Option<String>,
    /// Already-parsed instants (structured data) take precedence over text.
    pub start: Option<NormalizedDate>,
    pub end: Option<NormalizedDate>,
    pub location: String,
    pub city: Option<String>,
    pub url: String,
    pub description: String,
}

/// Normalizes an announcement into a candidate. Returns `None` when the
/// record lacks a title, has an unreadable date or falls outside `horizon`.
pub fn build_candidate(
    source_id: &str,
    locale: &LocaleConfig,
    announcement: Announcement,
    horizon: &Horizon,
) -> Option<CandidateEvent> {
    let title = clean_text(&announcement.title);
    if title.is_empty() || announcement.url.trim().is_empty() {
        tracing::debug!(source = source_id, "dropping announcement without title or url");
        return None;
    }

    let start = announcement.start.or_else(|| {
        let text = match announcement.time_text.as_deref() {
            Some(time) => format!("{} {}", announcement.date_text, time),
            None => announcement.date_text.clone(),
        };
        normalize_date_at(&text, locale, horizon.now)
    });
    let Some(start) = start else {
        tracing::debug!(
            source = source_id,
            date = announcement.date_text.as_str(),
            "dropping announcement with unreadable date"
        );
        return None;
    };
    if !horizon.contains(start.instant) {
        tracing::debug!(source = source_id, title = title.as_str(), "outside horizon");
        return None;
    }

    let end = announcement.end.or_else(|| {
        let end_time = announcement.end_text.as_deref()?;
        let text = format!("{} {}", announcement.date_text, end_time);
        normalize_date_at(&text, locale, horizon.now)
    });
    let end = end.filter(|end| end.instant >= start.instant);

    let description = clean_text(&announcement.description);
    let attendees = extract_attendees(&format!("{title} {description}"), locale, None);
    let location = clean_text(&announcement.location);

    Some(CandidateEvent {
        source: source_id.to_string(),
        city: announcement.city.map(|city| clean_text(&city)),
        country: Some(locale.country.to_string()),
        tags: vec![kind_tag(&format!("{title} {description}")).to_string()],
        title,
        start: Some(start.instant),
        start_time_known: start.time_known,
        end: end.map(|end| end.instant),
        end_time_known: end.map(|end| end.time_known).unwrap_or(false),
        language: locale.language.to_string(),
        original_location: location.clone(),
        location,
        url: announcement.url.trim().to_string(),
        attendees,
    })
}

pub fn kind_tag(text: &str) -> &'static str {
    if MARCH_RE.is_match(text) {
        "march"
    } else {
        "rally"
    }
}

pub fn split_time_range(text: &str) -> (String, Option<String>) {
    match TIME_RANGE_RE.captures(text) {
        Some(caps) => (caps[1].to_string(), Some(caps[2].to_string())),
        None => (clean_text(text), None),
    }
}

/// Reads an ISO 8601 value from structured data. Offset-less values are
/// local to `locale`; a bare date leaves the time unknown.
pub fn parse_iso_date(text: &str, locale: &LocaleConfig) -> Option<NormalizedDate> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(NormalizedDate {
            instant: parsed.with_timezone(&Utc),
            time_known: true,
        });
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return dates::localize(naive, locale).map(|instant| NormalizedDate {
                instant,
                time_known: true,
            });
        }
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    dates::localize(NaiveDateTime::new(date, NaiveTime::MIN), locale).map(|instant| {
        NormalizedDate {
            instant,
            time_known: false,
        }
    })
}

/// Every schema.org `Event` object embedded in the page, in document order.
/// Handles top-level arrays and `@graph` containers.
pub fn json_ld_events(document: &Html) -> Vec<Value> {
    let mut events = Vec::new();
    for script in document.select(&JSON_LD_SELECTOR) {
        let raw = script.text().collect::<String>();
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => collect_events(value, &mut events),
            Err(err) => tracing::debug!("skipping malformed json-ld block: {err}"),
        }
    }
    events
}

fn collect_events(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_events(item, out);
            }
        }
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                collect_events(graph, out);
            }
            let value = Value::Object(map);
            if is_event_type(value.get("@type")) {
                out.push(value);
            }
        }
        _ => {}
    }
}

fn is_event_type(kind: Option<&Value>) -> bool {
    match kind {
        Some(Value::String(name)) => name.ends_with("Event"),
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| name.ends_with("Event")),
        _ => false,
    }
}

/// Text of a JSON-LD property that may be a string or a `{"name": ..}` object.
pub fn json_ld_text(value: &Value, key: &str) -> Option<String> {
    let text = match value.get(key)? {
        Value::String(text) => text.clone(),
        Value::Object(map) => map.get("name")?.as_str()?.to_string(),
        _ => return None,
    };
    let cleaned = clean_text(&text);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::locale_for;
    use crate::models::fixtures::at;

    fn horizon() -> Horizon {
        Horizon {
            now: at(2025, 10, 14, 9, 0),
            days: 40,
        }
    }

    fn announcement(date: &str) -> Announcement {
        Announcement {
            title: "  Kundgebung   für Frieden ".to_string(),
            date_text: date.to_string(),
            time_text: Some("14:00".to_string()),
            end_text: Some("16:00".to_string()),
            location: "Alexanderplatz".to_string(),
            city: Some("Berlin".to_string()),
            url: "https://example.org/a".to_string(),
            description: "Erwartet werden ca. 2.000 Teilnehmende".to_string(),
            ..Announcement::default()
        }
    }

    #[test]
    fn builds_normalized_candidate() {
        let de = locale_for("DE").unwrap();
        let event = build_candidate("test", de, announcement("23.10.2025"), &horizon()).unwrap();
        assert_eq!(event.title, "Kundgebung für Frieden");
        assert_eq!(event.start, Some(at(2025, 10, 23, 12, 0)));
        assert!(event.start_time_known);
        assert_eq!(event.end, Some(at(2025, 10, 23, 14, 0)));
        assert_eq!(event.attendees, Some(2000));
        assert_eq!(event.country.as_deref(), Some("DE"));
        assert_eq!(event.language, "de");
        assert_eq!(event.tags, vec!["rally".to_string()]);
    }

    #[test]
    fn drops_unreadable_and_out_of_horizon_dates() {
        let de = locale_for("DE").unwrap();
        assert!(build_candidate("test", de, announcement("demnächst"), &horizon()).is_none());
        assert!(build_candidate("test", de, announcement("10.10.2025"), &horizon()).is_none());
        assert!(build_candidate("test", de, announcement("23.12.2025"), &horizon()).is_none());
    }

    #[test]
    fn splits_time_ranges() {
        assert_eq!(
            split_time_range("14:00 - 16:30 Uhr"),
            ("14:00".to_string(), Some("16:30".to_string()))
        );
        assert_eq!(split_time_range("ab 18 Uhr"), ("ab 18 Uhr".to_string(), None));
    }

    #[test]
    fn anchors_are_stable_and_distinct() {
        let a = stable_anchor("https://e.org/list", &["23.10.2025", "Demo", "Marienplatz"]);
        let b = stable_anchor("https://e.org/list", &["23.10.2025", " Demo ", "marienplatz"]);
        let c = stable_anchor("https://e.org/list", &["24.10.2025", "Demo", "Marienplatz"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("https://e.org/list#"));
    }

    #[test]
    fn iso_dates_respect_offsets_and_locale() {
        let fr = locale_for("FR").unwrap();
        let with_offset = parse_iso_date("2025-10-23T14:00:00+02:00", fr).unwrap();
        assert_eq!(with_offset.instant, at(2025, 10, 23, 12, 0));
        let local = parse_iso_date("2025-10-23T14:00", fr).unwrap();
        assert_eq!(local.instant, at(2025, 10, 23, 12, 0));
        let day = parse_iso_date("2025-10-23", fr).unwrap();
        assert!(!day.time_known);
    }

    #[test]
    fn finds_json_ld_events_in_graphs_and_arrays() {
        let html = r#"<html><head>
            <script type="application/ld+json">{"@graph":[{"@type":"WebPage"},{"@type":"Event","name":"A"}]}</script>
            <script type="application/ld+json">[{"@type":["Thing","SocialEvent"],"name":"B"}]</script>
            <script type="application/ld+json">{ broken</script>
        </head></html>"#;
        let events = json_ld_events(&Html::parse_document(html));
        let names: Vec<_> = events.iter().filter_map(|e| json_ld_text(e, "name")).collect();
        assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn tags_marches() {
        assert_eq!(kind_tag("Großer Aufzug durch Mitte"), "march");
        assert_eq!(kind_tag("Mahnwache"), "rally");
    }
}
