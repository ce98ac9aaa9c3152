//! Crowd-size estimates from free text.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::locale::{LocaleConfig, NUMBER};

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i){NUMBER}\s*(?:-|–|bis|to|à|tot)\s*{NUMBER}"))
        .expect("valid count range regex")
});

/// Estimated attendee count, or `None` when the text names no count.
///
/// `keywords` overrides the locale's default count nouns.
pub fn extract_attendees(
    text: &str,
    locale: &LocaleConfig,
    keywords: Option<&[&str]>,
) -> Option<u64> {
    if text.trim().is_empty() {
        return None;
    }

    for pattern in &locale.approximate_patterns {
        if let Some(value) = pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| to_number(m.as_str()))
        {
            return Some(value);
        }
    }

    if let Some(value) = RANGE_RE
        .captures_iter(text)
        .filter(|caps| stands_alone(text, caps))
        .find_map(|caps| max_of(&caps, 1, 2))
    {
        return Some(value);
    }

    let keywords = keywords.unwrap_or(locale.count_keywords);
    keyword_pattern(locale.count_qualifiers, keywords)
        .and_then(|pattern| pattern.captures(text).and_then(|caps| max_of(&caps, 1, 2)))
}

/// Rejects ranges that are really pieces of dates or times ("2025-10-23",
/// "14:00-16:00").
fn stands_alone(text: &str, caps: &Captures<'_>) -> bool {
    let Some(whole) = caps.get(0) else {
        return false;
    };
    let bytes = text.as_bytes();
    let glued = |b: u8| matches!(b, b'-' | b':' | b'/' | b'.');
    let before_ok = whole.start() == 0 || !glued(bytes[whole.start() - 1]);
    let after_ok = whole.end() == bytes.len() || {
        let next = bytes[whole.end()];
        !glued(next) && !next.is_ascii_digit()
    };
    before_ok && after_ok
}

fn keyword_pattern(qualifiers: &[&str], keywords: &[&str]) -> Option<Regex> {
    if keywords.is_empty() {
        return None;
    }
    let join = |words: &[&str]| {
        words
            .iter()
            .map(|word| regex::escape(word))
            .collect::<Vec<_>>()
            .join("|")
    };
    let qualifier = if qualifiers.is_empty() {
        String::new()
    } else {
        format!(r"(?:(?:{})\s*)?", join(qualifiers))
    };
    let pattern = format!(
        r"(?i){qualifier}{NUMBER}(?:\s*(?:-|–|bis|to|à|tot)\s*{NUMBER})?\s+(?:{})\b",
        join(keywords)
    );
    Regex::new(&pattern).ok()
}

fn max_of(caps: &Captures<'_>, first: usize, second: usize) -> Option<u64> {
    let a = caps.get(first).and_then(|m| to_number(m.as_str()));
    let b = caps.get(second).and_then(|m| to_number(m.as_str()));
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn to_number(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}
