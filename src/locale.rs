//! Per-country parsing rules.
//!
//! Every supported country is one entry in [`LOCALES`]; adding a country is
//! adding an entry, the normalizers never branch on country codes.

use std::collections::HashMap;

use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ConfigError;

/// Number token accepted by the count patterns: plain digits or digit groups
/// separated by dots or spaces ("1.000", "12 500").
pub const NUMBER: &str = r"(\d{1,3}(?:[.\s\u{a0}]\d{3})+|\d+)";

#[derive(Debug)]
pub struct LocaleConfig {
    pub country: &'static str,
    pub country_name: &'static str,
    pub language: &'static str,
    pub timezone: Tz,
    pub months: &'static [(&'static str, u32)],
    pub weekdays: &'static [&'static str],
    pub time_suffixes: &'static [&'static str],
    /// Letters glued to a day number, e.g. `1er`, `2nd`.
    pub ordinal_suffixes: &'static [&'static str],
    /// Filler words around times ("um", "à", "at") removed before parsing.
    pub connectors: &'static [&'static str],
    /// Letter separating hours from minutes in local notation, e.g. `14h30`.
    pub hour_marker: Option<&'static str>,
    /// Ordered strict-parse candidates, applied after month names became
    /// numerals and commas were dropped.
    pub date_formats: &'static [&'static str],
    pub canonical_date_format: &'static str,
    pub approximate_patterns: Vec<Regex>,
    pub count_qualifiers: &'static [&'static str],
    pub count_keywords: &'static [&'static str],
}

const GERMAN_MONTHS: &[(&str, u32)] = &[
    ("Januar", 1),
    ("Jänner", 1),
    ("Jan", 1),
    ("Februar", 2),
    ("Feber", 2),
    ("Feb", 2),
    ("März", 3),
    ("Mär", 3),
    ("Mrz", 3),
    ("April", 4),
    ("Apr", 4),
    ("Mai", 5),
    ("Juni", 6),
    ("Jun", 6),
    ("Juli", 7),
    ("Jul", 7),
    ("August", 8),
    ("Aug", 8),
    ("September", 9),
    ("Sept", 9),
    ("Sep", 9),
    ("Oktober", 10),
    ("Okt", 10),
    ("November", 11),
    ("Nov", 11),
    ("Dezember", 12),
    ("Dez", 12),
];

const GERMAN_WEEKDAYS: &[&str] = &[
    "Montag",
    "Dienstag",
    "Mittwoch",
    "Donnerstag",
    "Freitag",
    "Samstag",
    "Sonnabend",
    "Sonntag",
    "Mo",
    "Di",
    "Mi",
    "Do",
    "Fr",
    "Sa",
    "So",
];

const GERMAN_FORMATS: &[&str] = &[
    "%d.%m.%Y %H:%M",
    "%d.%m.%Y",
    "%d.%m.%y %H:%M",
    "%d.%m.%y",
    "%d. %m %Y %H:%M",
    "%d. %m %Y",
    "%d %m %Y %H:%M",
    "%d %m %Y",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%d.%m. %H:%M",
    "%d.%m.",
    "%d. %m %H:%M",
    "%d. %m",
    "%d.%m %H:%M",
    "%d.%m",
];

const GERMAN_QUALIFIERS: &[&str] = &[
    "ca.",
    "ca",
    "circa",
    "etwa",
    "rund",
    "ungefähr",
    "über",
    "bis zu",
    "mehr als",
    "mindestens",
];

const GERMAN_KEYWORDS: &[&str] = &[
    "Teilnehmende",
    "Teilnehmenden",
    "Teilnehmer",
    "Teilnehmerinnen",
    "Personen",
    "Menschen",
    "Demonstrierende",
    "Demonstranten",
    "Leute",
];

const FRENCH_MONTHS: &[(&str, u32)] = &[
    ("janvier", 1),
    ("janv", 1),
    ("février", 2),
    ("fevrier", 2),
    ("févr", 2),
    ("mars", 3),
    ("avril", 4),
    ("avr", 4),
    ("mai", 5),
    ("juin", 6),
    ("juillet", 7),
    ("juil", 7),
    ("août", 8),
    ("aout", 8),
    ("septembre", 9),
    ("sept", 9),
    ("octobre", 10),
    ("oct", 10),
    ("novembre", 11),
    ("nov", 11),
    ("décembre", 12),
    ("decembre", 12),
    ("déc", 12),
];

const FRENCH_WEEKDAYS: &[&str] = &[
    "lundi", "mardi", "mercredi", "jeudi", "vendredi", "samedi", "dimanche", "lun", "mar", "mer",
    "jeu", "ven", "sam", "dim",
];

const FRENCH_FORMATS: &[&str] = &[
    "%d %m %Y %H:%M",
    "%d %m %Y",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%d %m %H:%M",
    "%d %m",
    "%d/%m %H:%M",
    "%d/%m",
];

const FRENCH_QUALIFIERS: &[&str] = &[
    "environ",
    "près de",
    "plus de",
    "quelque",
    "jusqu'à",
    "au moins",
];

const FRENCH_KEYWORDS: &[&str] = &[
    "participants",
    "participantes",
    "personnes",
    "manifestants",
    "manifestantes",
];

const DUTCH_MONTHS: &[(&str, u32)] = &[
    ("januari", 1),
    ("jan", 1),
    ("februari", 2),
    ("feb", 2),
    ("maart", 3),
    ("mrt", 3),
    ("april", 4),
    ("apr", 4),
    ("mei", 5),
    ("juni", 6),
    ("jun", 6),
    ("juli", 7),
    ("jul", 7),
    ("augustus", 8),
    ("aug", 8),
    ("september", 9),
    ("sep", 9),
    ("oktober", 10),
    ("okt", 10),
    ("november", 11),
    ("nov", 11),
    ("december", 12),
    ("dec", 12),
];

const DUTCH_WEEKDAYS: &[&str] = &[
    "maandag", "dinsdag", "woensdag", "donderdag", "vrijdag", "zaterdag", "zondag", "ma", "di",
    "wo", "do", "vr", "za", "zo",
];

const DUTCH_FORMATS: &[&str] = &[
    "%d-%m-%Y %H:%M",
    "%d-%m-%Y",
    "%d %m %Y %H:%M",
    "%d %m %Y",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%d %m %H:%M",
    "%d %m",
    "%d-%m",
];

const DUTCH_QUALIFIERS: &[&str] = &["ongeveer", "circa", "ca.", "zo'n", "meer dan", "ruim"];

const DUTCH_KEYWORDS: &[&str] = &["deelnemers", "mensen", "personen", "demonstranten"];

const ENGLISH_MONTHS: &[(&str, u32)] = &[
    ("January", 1),
    ("Jan", 1),
    ("February", 2),
    ("Feb", 2),
    ("March", 3),
    ("Mar", 3),
    ("April", 4),
    ("Apr", 4),
    ("May", 5),
    ("June", 6),
    ("Jun", 6),
    ("July", 7),
    ("Jul", 7),
    ("August", 8),
    ("Aug", 8),
    ("September", 9),
    ("Sept", 9),
    ("Sep", 9),
    ("October", 10),
    ("Oct", 10),
    ("November", 11),
    ("Nov", 11),
    ("December", 12),
    ("Dec", 12),
];

const ENGLISH_WEEKDAYS: &[&str] = &[
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
    "Mon",
    "Tue",
    "Tues",
    "Wed",
    "Thu",
    "Thurs",
    "Fri",
    "Sat",
    "Sun",
];

const BRITISH_FORMATS: &[&str] = &[
    "%d/%m/%Y %I:%M %p",
    "%d %m %Y %I:%M %p",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y",
    "%d %m %Y %H:%M",
    "%d %m %Y",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%d %m %H:%M",
    "%d %m",
];

const AMERICAN_FORMATS: &[&str] = &[
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y",
    "%m %d %Y %I:%M %p",
    "%m %d %Y %H:%M",
    "%m %d %Y",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%m %d %H:%M",
    "%m %d",
    "%m/%d",
];

const ENGLISH_QUALIFIERS: &[&str] = &[
    "about",
    "approx.",
    "approximately",
    "around",
    "roughly",
    "up to",
    "over",
    "more than",
    "at least",
    "ca.",
];

const ENGLISH_KEYWORDS: &[&str] = &[
    "participants",
    "people",
    "attendees",
    "protesters",
    "protestors",
    "demonstrators",
    "marchers",
];

/// Builds the locale's "approximate count" expressions: a qualifier followed
/// by a number, the number being the first capture group.
fn approximate(qualifiers: &[&str]) -> Vec<Regex> {
    qualifiers
        .iter()
        .map(|word| {
            let pattern = format!(r"(?i)(?:^|\s|\(){}\s*{NUMBER}", regex::escape(word));
            Regex::new(&pattern).expect("valid approximate-count regex")
        })
        .collect()
}

fn german(country: &'static str, country_name: &'static str, timezone: Tz) -> LocaleConfig {
    LocaleConfig {
        country,
        country_name,
        language: "de",
        timezone,
        months: GERMAN_MONTHS,
        weekdays: GERMAN_WEEKDAYS,
        time_suffixes: &["Uhr", "h"],
        ordinal_suffixes: &[],
        connectors: &["um", "ab", "von", "am"],
        hour_marker: None,
        date_formats: GERMAN_FORMATS,
        canonical_date_format: "%d.%m.%Y",
        approximate_patterns: approximate(GERMAN_QUALIFIERS),
        count_qualifiers: GERMAN_QUALIFIERS,
        count_keywords: GERMAN_KEYWORDS,
    }
}

fn french(country: &'static str, country_name: &'static str, timezone: Tz) -> LocaleConfig {
    LocaleConfig {
        country,
        country_name,
        language: "fr",
        timezone,
        months: FRENCH_MONTHS,
        weekdays: FRENCH_WEEKDAYS,
        time_suffixes: &[],
        ordinal_suffixes: &["er", "ère", "re"],
        connectors: &["à", "de", "le", "dès"],
        hour_marker: Some("h"),
        date_formats: FRENCH_FORMATS,
        canonical_date_format: "%d/%m/%Y",
        approximate_patterns: approximate(FRENCH_QUALIFIERS),
        count_qualifiers: FRENCH_QUALIFIERS,
        count_keywords: FRENCH_KEYWORDS,
    }
}

fn english(
    country: &'static str,
    country_name: &'static str,
    timezone: Tz,
    date_formats: &'static [&'static str],
    canonical_date_format: &'static str,
) -> LocaleConfig {
    LocaleConfig {
        country,
        country_name,
        language: "en",
        timezone,
        months: ENGLISH_MONTHS,
        weekdays: ENGLISH_WEEKDAYS,
        time_suffixes: &[],
        ordinal_suffixes: &["st", "nd", "rd", "th"],
        connectors: &["at", "from", "on"],
        hour_marker: None,
        date_formats,
        canonical_date_format,
        approximate_patterns: approximate(ENGLISH_QUALIFIERS),
        count_qualifiers: ENGLISH_QUALIFIERS,
        count_keywords: ENGLISH_KEYWORDS,
    }
}

static LOCALES: Lazy<HashMap<&'static str, LocaleConfig>> = Lazy::new(|| {
    let entries = vec![
        german("DE", "Deutschland", chrono_tz::Europe::Berlin),
        german("AT", "Österreich", chrono_tz::Europe::Vienna),
        german("CH", "Schweiz", chrono_tz::Europe::Zurich),
        french("FR", "France", chrono_tz::Europe::Paris),
        french("BE", "Belgique", chrono_tz::Europe::Brussels),
        LocaleConfig {
            country: "NL",
            country_name: "Nederland",
            language: "nl",
            timezone: chrono_tz::Europe::Amsterdam,
            months: DUTCH_MONTHS,
            weekdays: DUTCH_WEEKDAYS,
            time_suffixes: &["uur"],
            ordinal_suffixes: &["e", "ste", "de"],
            connectors: &["om", "van", "vanaf"],
            hour_marker: None,
            date_formats: DUTCH_FORMATS,
            canonical_date_format: "%d-%m-%Y",
            approximate_patterns: approximate(DUTCH_QUALIFIERS),
            count_qualifiers: DUTCH_QUALIFIERS,
            count_keywords: DUTCH_KEYWORDS,
        },
        english(
            "GB",
            "United Kingdom",
            chrono_tz::Europe::London,
            BRITISH_FORMATS,
            "%d/%m/%Y",
        ),
        english(
            "US",
            "United States",
            chrono_tz::America::New_York,
            AMERICAN_FORMATS,
            "%m/%d/%Y",
        ),
    ];
    entries
        .into_iter()
        .map(|locale| (locale.country, locale))
        .collect()
});

pub fn locale_for(country: &str) -> Option<&'static LocaleConfig> {
    LOCALES.get(country.to_ascii_uppercase().as_str())
}

pub fn require_locale(country: &str, source_id: &str) -> Result<&'static LocaleConfig, ConfigError> {
    locale_for(country).ok_or_else(|| ConfigError::UnknownLocale {
        country: country.to_string(),
        source_id: source_id.to_string(),
    })
}

pub fn supported_countries() -> Vec<&'static str> {
    let mut out: Vec<&'static str> = LOCALES.keys().copied().collect();
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let de = locale_for("de").expect("german locale");
        assert_eq!(de.country, "DE");
        assert_eq!(de.timezone, chrono_tz::Europe::Berlin);
        assert!(locale_for("XX").is_none());
    }

    #[test]
    fn missing_locale_is_a_config_error() {
        let err = require_locale("ZZ", "nowhere").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLocale { .. }));
    }

    #[test]
    fn every_locale_has_twelve_months_and_formats() {
        for country in supported_countries() {
            let locale = locale_for(country).unwrap();
            let mut months: Vec<u32> = locale.months.iter().map(|(_, n)| *n).collect();
            months.sort_unstable();
            months.dedup();
            assert_eq!(months, (1..=12).collect::<Vec<_>>(), "{country}");
            assert!(!locale.date_formats.is_empty(), "{country}");
            assert_eq!(
                locale.approximate_patterns.len(),
                locale.count_qualifiers.len()
            );
        }
    }
}
