//! Crawl-directive (`robots.txt`) checks, cached per origin.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::Url;

use crate::http::{origin_of, HttpClient};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed directive document. An empty rule set permits everything.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    groups: Vec<Group>,
}

impl RobotsRules {
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current: Option<Group> = None;
        let mut in_agent_block = false;

        for raw_line in text.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !in_agent_block {
                        if let Some(done) = current.take() {
                            groups.push(done);
                        }
                        current = Some(Group::default());
                    }
                    in_agent_block = true;
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    in_agent_block = false;
                    let Some(group) = current.as_mut() else {
                        continue;
                    };
                    // An empty Disallow grants everything; it adds no rule.
                    if value.is_empty() {
                        continue;
                    }
                    group.rules.push(Rule {
                        allow: key == "allow",
                        pattern: value.to_string(),
                    });
                }
                _ => {
                    in_agent_block = false;
                }
            }
        }
        if let Some(done) = current.take() {
            groups.push(done);
        }
        Self { groups }
    }

    pub fn is_allowed(&self, identity: &str, path: &str) -> bool {
        let token = product_token(identity);
        let specific = self
            .groups
            .iter()
            .filter_map(|group| {
                group
                    .agents
                    .iter()
                    .filter(|agent| agent.as_str() != "*" && token.contains(agent.as_str()))
                    .map(|agent| agent.len())
                    .max()
                    .map(|len| (len, group))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, group)| group);
        let group = specific.or_else(|| {
            self.groups
                .iter()
                .find(|group| group.agents.iter().any(|agent| agent == "*"))
        });
        let Some(group) = group else {
            return true;
        };

        let mut best: Option<(usize, bool)> = None;
        for rule in &group.rules {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            let len = rule.pattern.len();
            best = match best {
                Some((best_len, best_allow)) if best_len > len => Some((best_len, best_allow)),
                Some((best_len, best_allow)) if best_len == len => {
                    Some((best_len, best_allow || rule.allow))
                }
                _ => Some((len, rule.allow)),
            };
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }
}

fn product_token(identity: &str) -> String {
    identity
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Prefix match with `*` wildcards and a trailing `$` anchor.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };
    let pieces: Vec<&str> = pattern.split('*').collect();
    let mut cursor = 0usize;
    for (index, piece) in pieces.iter().enumerate() {
        if index == 0 {
            if !path.starts_with(piece) {
                return false;
            }
            cursor = piece.len();
            continue;
        }
        if piece.is_empty() {
            continue;
        }
        let is_last = index == pieces.len() - 1;
        if is_last && anchored {
            return path.len() >= cursor + piece.len() && path[cursor..].ends_with(piece);
        }
        match path[cursor..].find(piece) {
            Some(found) => cursor += found + piece.len(),
            None => return false,
        }
    }
    if anchored {
        pattern.ends_with('*') || cursor == path.len()
    } else {
        true
    }
}

struct CachedRules {
    fetched_at: Instant,
    rules: Arc<RobotsRules>,
}

pub struct RobotsGuard {
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedRules>>,
}

impl RobotsGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Checks `url` against its origin's crawl directives. An unreachable or
    /// missing directive document permits the fetch, and that verdict is
    /// cached like a real document.
    pub async fn allowed(&self, http: &HttpClient, url: &str, identity: &str) -> bool {
        let Some(origin) = origin_of(url) else {
            return true;
        };
        let path = request_path(url);

        if let Some(rules) = self.cached(&origin) {
            return rules.is_allowed(identity, &path);
        }

        let robots_url = format!("{origin}/robots.txt");
        let rules = match http.get_text(&robots_url).await {
            Ok(body) => RobotsRules::parse(&body),
            Err(err) => {
                tracing::debug!(origin = origin.as_str(), "no crawl directives, permitting: {err}");
                RobotsRules::permissive()
            }
        };
        let rules = Arc::new(rules);
        self.store(&origin, rules.clone());
        rules.is_allowed(identity, &path)
    }

    fn cached(&self, origin: &str) -> Option<Arc<RobotsRules>> {
        let guard = self.cache.lock().ok()?;
        guard
            .get(origin)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.rules.clone())
    }

    fn store(&self, origin: &str, rules: Arc<RobotsRules>) {
        if let Ok(mut guard) = self.cache.lock() {
            guard.insert(
                origin.to_string(),
                CachedRules {
                    fetched_at: Instant::now(),
                    rules,
                },
            );
        }
    }

    #[cfg(test)]
    pub(crate) fn seed(&self, url: &str, rules: RobotsRules) {
        if let Some(origin) = origin_of(url) {
            self.store(&origin, Arc::new(rules));
        }
    }
}

fn request_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        },
        Err(_) => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT: &str = "ProtestPipeline/0.1 (+https://example.org)";

    const ROBOTS: &str = "
# sample
User-agent: *
Disallow: /intern/
Allow: /intern/public
Disallow: /*.pdf$

User-agent: badbot
User-agent: protestpipeline
Disallow: /versammlungen/archiv
";

    #[test]
    fn specific_group_overrides_wildcard() {
        let rules = RobotsRules::parse(ROBOTS);
        assert!(!rules.is_allowed(AGENT, "/versammlungen/archiv/2020"));
        // The wildcard group's rules no longer apply once a specific group matched.
        assert!(rules.is_allowed(AGENT, "/intern/geheim"));
        assert!(!rules.is_allowed("OtherBot/1.0", "/intern/geheim"));
    }

    #[test]
    fn longest_match_and_wildcards() {
        let rules = RobotsRules::parse(ROBOTS);
        assert!(rules.is_allowed("OtherBot/1.0", "/intern/public/list"));
        assert!(!rules.is_allowed("OtherBot/1.0", "/files/flyer.pdf"));
        assert!(rules.is_allowed("OtherBot/1.0", "/files/flyer.pdf?x=1"));
        assert!(rules.is_allowed("OtherBot/1.0", "/"));
    }

    #[test]
    fn empty_disallow_permits_everything() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n");
        assert!(rules.is_allowed(AGENT, "/anything"));
        let blocked = RobotsRules::parse("User-agent: *\nDisallow: /\n");
        assert!(!blocked.is_allowed(AGENT, "/anything"));
    }

    #[tokio::test]
    async fn seeded_rules_are_served_from_cache() {
        let http = HttpClient::new(AGENT, Duration::from_secs(2)).unwrap();
        let guard = RobotsGuard::new(Duration::from_secs(3600));
        guard.seed(
            "https://blocked.example/",
            RobotsRules::parse("User-agent: *\nDisallow: /\n"),
        );
        assert!(!guard.allowed(&http, "https://blocked.example/events", AGENT).await);
    }

    #[tokio::test]
    async fn unreachable_directives_permit_and_are_cached() {
        let http = HttpClient::new(AGENT, Duration::from_secs(2)).unwrap();
        let guard = RobotsGuard::new(Duration::from_secs(3600));
        assert!(guard.allowed(&http, "http://127.0.0.1:9/events", AGENT).await);
        assert!(guard.cached("http://127.0.0.1:9").is_some());
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let http = HttpClient::new(AGENT, Duration::from_secs(2)).unwrap();
        let guard = RobotsGuard::new(Duration::from_millis(20));
        guard.seed(
            "http://127.0.0.1:9/",
            RobotsRules::parse("User-agent: *\nDisallow: /\n"),
        );
        assert!(guard.cached("http://127.0.0.1:9").is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(guard.cached("http://127.0.0.1:9").is_none());
        // The stale block is gone; the unreachable refetch permits.
        assert!(guard.allowed(&http, "http://127.0.0.1:9/events", AGENT).await);
    }
}
