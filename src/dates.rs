//! Locale-aware date normalization.

use std::collections::HashMap;

use chrono::{
    DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::locale::{self, LocaleConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedDate {
    pub instant: DateTime<Utc>,
    pub time_known: bool,
}

static CLOCK_COLON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}:\d{2}\b").expect("valid clock regex"));
static DOT_PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}\.\d{2}").expect("valid dot-pair regex"));
static END_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\d{1,2}[:.]\d{2})\s*(?:-|–|—|bis|to|until|till|à|au|tot)\s*\d{1,2}(?:[:.]\d{2})?\s*$",
    )
    .expect("valid end-range regex")
});
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4}\b").expect("valid year regex"));

struct LocalePatterns {
    hour_marker: Option<(Regex, Regex)>,
    suffixes: Option<Regex>,
    ordinals: Option<Regex>,
    months: Vec<(Regex, u32)>,
    weekdays: Option<Regex>,
    connectors: Option<Regex>,
}

fn word_alternation(words: &[&str]) -> Option<String> {
    if words.is_empty() {
        return None;
    }
    let mut sorted: Vec<&str> = words.to_vec();
    sorted.sort_by_key(|word| std::cmp::Reverse(word.chars().count()));
    Some(
        sorted
            .iter()
            .map(|word| regex::escape(word))
            .collect::<Vec<_>>()
            .join("|"),
    )
}

impl LocalePatterns {
    fn compile(locale: &LocaleConfig) -> Self {
        let hour_marker = locale.hour_marker.map(|marker| {
            let marker = regex::escape(marker);
            (
                Regex::new(&format!(r"(?i)\b(\d{{1,2}})\s*{marker}\s*(\d{{2}})\b"))
                    .expect("valid hour-marker regex"),
                Regex::new(&format!(r"(?i)\b(\d{{1,2}})\s*{marker}\b"))
                    .expect("valid bare hour-marker regex"),
            )
        });
        let suffixes = word_alternation(locale.time_suffixes).map(|alt| {
            Regex::new(&format!(r"(?i)\s*\b(?:{alt})\b\.?")).expect("valid suffix regex")
        });
        let ordinals = word_alternation(locale.ordinal_suffixes).map(|alt| {
            Regex::new(&format!(r"(?i)\b(\d{{1,2}})(?:{alt})\b")).expect("valid ordinal regex")
        });
        let months = locale
            .months
            .iter()
            .map(|(name, number)| {
                let pattern = format!(r"(?i)\b{}\b\.?", regex::escape(name));
                (Regex::new(&pattern).expect("valid month regex"), *number)
            })
            .collect();
        let weekdays = word_alternation(locale.weekdays).map(|alt| {
            Regex::new(&format!(r"(?i)\b(?:{alt})\b\.?")).expect("valid weekday regex")
        });
        let connectors = word_alternation(locale.connectors)
            .map(|alt| Regex::new(&format!(r"(?i)\b(?:{alt})\b")).expect("valid connector regex"));
        Self {
            hour_marker,
            suffixes,
            ordinals,
            months,
            weekdays,
            connectors,
        }
    }
}

static PATTERNS: Lazy<HashMap<&'static str, LocalePatterns>> = Lazy::new(|| {
    locale::supported_countries()
        .into_iter()
        .filter_map(locale::locale_for)
        .map(|locale| (locale.country, LocalePatterns::compile(locale)))
        .collect()
});

/// Parses `text` as written in `locale`, inferring a missing year relative to
/// `now`. Returns `None` for anything it cannot read.
pub fn normalize_date_at(
    text: &str,
    locale: &LocaleConfig,
    now: DateTime<Utc>,
) -> Option<NormalizedDate> {
    let patterns = PATTERNS.get(locale.country)?;
    let mut working = collapse(text);
    if working.is_empty() {
        return None;
    }

    if let Some((with_minutes, bare)) = &patterns.hour_marker {
        working = with_minutes.replace_all(&working, "$1:$2").into_owned();
        working = bare.replace_all(&working, "$1:00").into_owned();
    }

    let clock_seen = has_clock_time(&working);

    if let Some(suffixes) = &patterns.suffixes {
        working = suffixes.replace_all(&working, "").into_owned();
    }
    working = END_RANGE_RE.replace(working.trim(), "$1").into_owned();
    if let Some(ordinals) = &patterns.ordinals {
        working = ordinals.replace_all(&working, "$1").into_owned();
    }

    for (month, number) in &patterns.months {
        let numeral = format!("{number:02} ");
        working = month.replace_all(&working, numeral.as_str()).into_owned();
    }
    if let Some(weekdays) = &patterns.weekdays {
        working = weekdays.replace_all(&working, " ").into_owned();
    }
    if let Some(connectors) = &patterns.connectors {
        working = connectors.replace_all(&working, " ").into_owned();
    }
    working = collapse(&working.replace(',', " "));
    working = dot_time_to_colon(&working);

    let (naive, has_time) = parse_candidates(&working, locale, now)?;
    let instant = localize(naive, locale)?;
    Some(NormalizedDate {
        instant,
        time_known: clock_seen && has_time,
    })
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A dot-separated pair counts as a clock time only when it is not glued to
/// further date parts ("14.00" yes, "23.10.2025" no).
fn dot_pairs(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    DOT_PAIR_RE
        .find_iter(text)
        .filter(|m| {
            let before_ok = m.start() == 0 || {
                let prev = bytes[m.start() - 1];
                !prev.is_ascii_digit() && prev != b'.'
            };
            let after_ok = m.end() == bytes.len() || {
                let next = bytes[m.end()];
                !next.is_ascii_digit() && next != b'.'
            };
            before_ok && after_ok
        })
        .map(|m| (m.start(), m.end()))
        .collect()
}

pub fn has_clock_time(text: &str) -> bool {
    CLOCK_COLON_RE.is_match(text) || !dot_pairs(text).is_empty()
}

/// Rewrites the last free-standing `H.MM` token into `H:MM` when other date
/// material precedes it.
fn dot_time_to_colon(text: &str) -> String {
    let bytes = text.as_bytes();
    let last = dot_pairs(text).into_iter().rev().find(|(start, end)| {
        let bounded = (*start == 0 || bytes[start - 1] == b' ')
            && (*end == bytes.len() || bytes[*end] == b' ');
        let rest_has_digit = text[..*start]
            .chars()
            .chain(text[*end..].chars())
            .any(|c| c.is_ascii_digit());
        bounded && rest_has_digit
    });
    match last {
        Some((start, end)) => {
            let token = text[start..end].replacen('.', ":", 1);
            format!("{}{}{}", &text[..start], token, &text[end..])
        }
        None => text.to_string(),
    }
}

fn format_has_time(format: &str) -> bool {
    format.contains("%H") || format.contains("%I")
}

fn format_has_year(format: &str) -> bool {
    format.contains("%Y") || format.contains("%y")
}

fn parse_with(text: &str, format: &str) -> Option<NaiveDateTime> {
    if format_has_time(format) {
        NaiveDateTime::parse_from_str(text, format).ok()
    } else {
        NaiveDate::parse_from_str(text, format)
            .ok()
            .map(|date| date.and_time(NaiveTime::MIN))
    }
}

fn parse_candidates(
    text: &str,
    locale: &LocaleConfig,
    now: DateTime<Utc>,
) -> Option<(NaiveDateTime, bool)> {
    let has_full_year = YEAR_RE.is_match(text);

    for format in locale.date_formats {
        if format.contains("%Y") && !has_full_year {
            continue;
        }
        if let Some(parsed) = parse_with(text, format) {
            return Some((parsed, format_has_time(format)));
        }
    }

    if has_full_year {
        return None;
    }

    let local_now = now.with_timezone(&locale.timezone);
    let year = local_now.year();
    let today = local_now.date_naive();
    for format in locale.date_formats.iter().filter(|f| !format_has_year(f)) {
        let extended = format!("{format} %Y");
        // 29 February only exists in leap years; a gap is at most eight years.
        for candidate in year..=year + 8 {
            let Some(parsed) = parse_with(&format!("{text} {candidate}"), &extended) else {
                continue;
            };
            if candidate == year && parsed.date() < today {
                continue;
            }
            return Some((parsed, format_has_time(format)));
        }
    }
    tracing::debug!(text, "no date format matched");
    None
}

pub(crate) fn localize(naive: NaiveDateTime, locale: &LocaleConfig) -> Option<DateTime<Utc>> {
    match locale.timezone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(dt, _) => Some(dt.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}
