pub mod base;
pub mod berlin_police_json;
pub mod demosphere_html;
pub mod munich_kvr_html;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ConfigError;
use crate::http::HttpClient;
use crate::locale;
use crate::models::CandidateEvent;
use crate::robots::RobotsGuard;

#[derive(Debug, Clone, Copy)]
pub struct Horizon {
    pub now: DateTime<Utc>,
    pub days: i64,
}

impl Horizon {
    pub fn new(now: DateTime<Utc>, days: i64) -> Self {
        Self { now, days }
    }

    /// From the start of today (UTC) to `days` after now.
    pub fn contains(&self, start: DateTime<Utc>) -> bool {
        let today = self
            .now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(self.now);
        start >= today && start <= self.now + chrono::Duration::days(self.days)
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn source_name(&self) -> &'static str;
    fn source_url(&self) -> &'static str;
    /// ISO country code whose locale governs parsing.
    fn country(&self) -> &'static str;
    fn request_delay(&self) -> Duration {
        Duration::from_secs(1)
    }
    async fn fetch(&self, http: &HttpClient, horizon: Horizon) -> anyhow::Result<Vec<CandidateEvent>>;
}

#[derive(Clone, Debug, Serialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub country: String,
}

pub fn active_adapters() -> Vec<Box<dyn SourceAdapter>> {
    vec![
        Box::new(berlin_police_json::BerlinPolice),
        Box::new(munich_kvr_html::MunichKvr),
        Box::new(demosphere_html::DemosphereParis),
    ]
}

pub fn list_sources() -> Vec<SourceInfo> {
    active_adapters()
        .into_iter()
        .map(|adapter| SourceInfo {
            id: adapter.source_id().to_string(),
            name: adapter.source_name().to_string(),
            url: adapter.source_url().to_string(),
            country: adapter.country().to_string(),
        })
        .collect()
}

pub fn find_adapter(id: &str) -> Option<Box<dyn SourceAdapter>> {
    active_adapters()
        .into_iter()
        .find(|adapter| adapter.source_id() == id)
}

/// The registry restricted to `ids`, in the order given; all adapters when
/// `ids` is empty.
pub fn select_adapters(ids: &[String]) -> Result<Vec<Box<dyn SourceAdapter>>, ConfigError> {
    if ids.is_empty() {
        return Ok(active_adapters());
    }
    ids.iter()
        .map(|id| find_adapter(id).ok_or_else(|| ConfigError::UnknownSource(id.clone())))
        .collect()
}

/// Every adapter must declare a country the locale registry knows.
pub fn validate_locales(adapters: &[Box<dyn SourceAdapter>]) -> Result<(), ConfigError> {
    for adapter in adapters {
        locale::require_locale(adapter.country(), adapter.source_id())?;
    }
    Ok(())
}

pub struct FetchContext<'a> {
    pub http: &'a HttpClient,
    pub guard: &'a RobotsGuard,
}

/// Runs one adapter behind the crawl policy. Never fails: denials and
/// adapter errors both come back as an empty list.
pub async fn collect(
    adapter: &dyn SourceAdapter,
    ctx: &FetchContext<'_>,
    horizon: Horizon,
) -> Vec<CandidateEvent> {
    let source = adapter.source_id();
    let url = adapter.source_url();
    if !ctx.guard.allowed(ctx.http, url, ctx.http.user_agent()).await {
        tracing::info!(source, url, "crawl policy disallows fetch, skipping source");
        return Vec::new();
    }
    ctx.http.set_origin_delay(url, adapter.request_delay()).await;

    match adapter.fetch(ctx.http, horizon).await {
        Ok(events) => {
            tracing::info!(source, count = events.len(), "source fetched");
            events
        }
        Err(err) => {
            tracing::warn!(source, "source failed: {err:#}");
            Vec::new()
        }
    }
}

/// Adapters run one at a time, in registry order.
pub async fn run_all(
    adapters: &[Box<dyn SourceAdapter>],
    ctx: &FetchContext<'_>,
    horizon: Horizon,
) -> Vec<CandidateEvent> {
    let mut events = Vec::new();
    for adapter in adapters {
        let mut fetched = collect(adapter.as_ref(), ctx, horizon).await;
        events.append(&mut fetched);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{at, candidate};
    use crate::robots::RobotsRules;

    struct StaticAdapter {
        id: &'static str,
        url: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn source_id(&self) -> &'static str {
            self.id
        }
        fn source_name(&self) -> &'static str {
            "Static"
        }
        fn source_url(&self) -> &'static str {
            self.url
        }
        fn country(&self) -> &'static str {
            "DE"
        }
        async fn fetch(&self, _http: &HttpClient, horizon: Horizon) -> anyhow::Result<Vec<CandidateEvent>> {
            if self.fail {
                anyhow::bail!("upstream exploded");
            }
            Ok(vec![candidate(self.url, self.id, Some(horizon.now))])
        }
    }

    fn http() -> HttpClient {
        HttpClient::new("ProtestPipeline/0.1", Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn horizon_spans_today_to_days_ahead() {
        let horizon = Horizon::new(at(2025, 10, 14, 9, 0), 40);
        assert!(horizon.contains(at(2025, 10, 14, 0, 0)));
        assert!(horizon.contains(at(2025, 11, 23, 9, 0)));
        assert!(!horizon.contains(at(2025, 10, 13, 23, 59)));
        assert!(!horizon.contains(at(2025, 11, 23, 9, 1)));
    }

    #[test]
    fn registry_ids_are_unique_and_localized() {
        let sources = list_sources();
        let mut ids: Vec<_> = sources.iter().map(|s| s.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), sources.len());
        assert!(validate_locales(&active_adapters()).is_ok());
    }

    #[test]
    fn selecting_unknown_source_fails() {
        let err = select_adapters(&["nowhere".to_string()]).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownSource(id) if id == "nowhere"));
        let picked = select_adapters(&["munich-kvr".to_string()]).unwrap();
        assert_eq!(picked.len(), 1);
    }

    #[tokio::test]
    async fn denied_and_failing_sources_yield_nothing() {
        let http = http();
        let guard = RobotsGuard::new(Duration::from_secs(3600));
        guard.seed("https://denied.example/", RobotsRules::parse("User-agent: *\nDisallow: /\n"));
        guard.seed("https://broken.example/", RobotsRules::permissive());
        guard.seed("https://fine.example/", RobotsRules::permissive());
        let ctx = FetchContext {
            http: &http,
            guard: &guard,
        };
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![
            Box::new(StaticAdapter { id: "denied", url: "https://denied.example/list", fail: false }),
            Box::new(StaticAdapter { id: "broken", url: "https://broken.example/list", fail: true }),
            Box::new(StaticAdapter { id: "fine", url: "https://fine.example/list", fail: false }),
        ];
        let events = run_all(&adapters, &ctx, Horizon::new(at(2025, 10, 14, 9, 0), 40)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "fine");
    }
}
