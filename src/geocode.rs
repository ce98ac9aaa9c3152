use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::http::{HttpClient, HttpError};
use crate::locale;
use crate::models::{CandidateEvent, GeoPoint};
use crate::utils;

static POSTAL_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d{4,5}|\d{4}\s?[A-Za-z]{2}|[A-Z]{1,2}\d[A-Z\d]?\s?\d[A-Z]{2})$")
        .expect("valid postal code regex")
});

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("http error: {0}")]
    Http(#[from] HttpError),
    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeHit {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: String,
}

#[async_trait]
pub trait GeocodeBackend: Send + Sync {
    async fn search(&self, query: &str) -> Result<Option<GeocodeHit>, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    lat: String,
    lon: String,
    display_name: String,
}

pub struct NominatimBackend {
    http: Arc<HttpClient>,
    endpoint: String,
}

impl NominatimBackend {
    pub async fn new(http: Arc<HttpClient>, endpoint: &str, interval: Duration) -> Self {
        http.set_origin_delay(endpoint, interval).await;
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GeocodeBackend for NominatimBackend {
    async fn search(&self, query: &str) -> Result<Option<GeocodeHit>, GeocodeError> {
        let url = Url::parse_with_params(
            &format!("{}/search", self.endpoint),
            [("q", query), ("format", "jsonv2"), ("limit", "1")],
        )
        .map_err(|err| GeocodeError::Parse(err.to_string()))?;
        let docs: Vec<SearchDoc> = self.http.get_json(url.as_str()).await?;
        let Some(doc) = docs.into_iter().next() else {
            return Ok(None);
        };
        let latitude = doc
            .lat
            .parse::<f64>()
            .map_err(|err| GeocodeError::Parse(format!("lat {}: {err}", doc.lat)))?;
        let longitude = doc
            .lon
            .parse::<f64>()
            .map_err(|err| GeocodeError::Parse(format!("lon {}: {err}", doc.lon)))?;
        Ok(Some(GeocodeHit {
            latitude,
            longitude,
            display_name: doc.display_name,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub latitude: f64,
    pub longitude: f64,
    pub normalized_address: String,
    pub formatted_address: String,
}

impl CacheEntry {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.longitude, self.latitude)
    }

    fn from_hit(hit: &GeocodeHit) -> Self {
        Self {
            latitude: hit.latitude,
            longitude: hit.longitude,
            normalized_address: format_address(&hit.display_name),
            formatted_address: hit.display_name.clone(),
        }
    }
}

/// Flat key → coordinate map kept in memory and written out in full after
/// every new entry. This process is the only writer.
pub struct GeocodeCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, CacheEntry>,
}

impl GeocodeCache {
    pub fn open(path: &Path) -> Self {
        let entries = match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), "ignoring unreadable geocode cache: {err}");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path: Some(path.to_path_buf()),
            entries,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), entry);
        if let Err(err) = self.persist() {
            tracing::warn!("failed to write geocode cache: {err}");
        }
    }

    fn persist(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        utils::ensure_parent(path);
        let contents = serde_json::to_string_pretty(&self.entries)?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, contents)?;
        fs::rename(&staging, path)
    }
}

pub struct Geocoder<B> {
    backend: B,
    cache: GeocodeCache,
}

impl<B: GeocodeBackend> Geocoder<B> {
    pub fn new(backend: B, cache: GeocodeCache) -> Self {
        Self { backend, cache }
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    /// Resolves `query`, consulting the cache under `cache_key` (default: the
    /// trimmed query) first. With a `(city, country name)` fallback, an empty
    /// upstream answer is retried once as "city, country". Failures are
    /// logged and reported as `None`.
    pub async fn geocode(
        &mut self,
        query: &str,
        cache_key: Option<&str>,
        fallback: Option<(&str, &str)>,
    ) -> Option<CacheEntry> {
        let query = query.trim();
        let key = cache_key.map(str::trim).unwrap_or(query);
        if key.is_empty() {
            return None;
        }
        if let Some(hit) = self.cache.get(key) {
            return Some(hit.clone());
        }

        match self.backend.search(query).await {
            Ok(Some(hit)) => {
                let entry = CacheEntry::from_hit(&hit);
                self.cache.insert(key, entry.clone());
                return Some(entry);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(query, "geocoding failed: {err}");
                return None;
            }
        }

        let (city, country) = fallback?;
        if city.trim().is_empty() {
            return None;
        }
        let simplified = if country.trim().is_empty() {
            city.trim().to_string()
        } else {
            format!("{}, {}", city.trim(), country.trim())
        };
        if simplified == query {
            return None;
        }
        match self.backend.search(&simplified).await {
            Ok(Some(hit)) => {
                let entry = CacheEntry::from_hit(&hit);
                self.cache.insert(key, entry.clone());
                Some(entry)
            }
            Ok(None) => {
                tracing::debug!(query, "no geocoding result, fallback exhausted");
                None
            }
            Err(err) => {
                tracing::warn!(query = simplified.as_str(), "fallback geocoding failed: {err}");
                None
            }
        }
    }

    /// Geocodes a candidate's location. On success the candidate's `location`
    /// becomes the normalized address; `original_location` is left alone.
    pub async fn geocode_candidate(&mut self, event: &mut CandidateEvent) -> Option<GeoPoint> {
        let query = location_query(event)?;
        let country_name = event
            .country
            .as_deref()
            .and_then(locale::locale_for)
            .map(|l| l.country_name)
            .unwrap_or("");
        let fallback = event.city.clone().map(|city| (city, country_name));
        let entry = self
            .geocode(
                &query,
                None,
                fallback.as_ref().map(|(city, country)| (city.as_str(), *country)),
            )
            .await?;
        if !entry.normalized_address.is_empty() {
            event.location = entry.normalized_address.clone();
        }
        Some(entry.point())
    }
}

fn location_query(event: &CandidateEvent) -> Option<String> {
    let location = event.location.trim();
    let city = event.city.as_deref().map(str::trim).unwrap_or("");
    let query = match (location.is_empty(), city.is_empty()) {
        (true, true) => return None,
        (true, false) => city.to_string(),
        (false, true) => location.to_string(),
        (false, false) if location.to_lowercase().contains(&city.to_lowercase()) => {
            location.to_string()
        }
        (false, false) => format!("{location}, {city}"),
    };
    Some(query)
}

/// Reorders an upstream address: drop the country, reverse the components
/// and fuse a postal code with the city that follows it.
pub fn format_address(display_name: &str) -> String {
    let mut parts: Vec<&str> = display_name
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    if parts.len() > 1 {
        parts.pop();
    }
    parts.reverse();

    let mut out: Vec<String> = Vec::with_capacity(parts.len());
    let mut index = 0;
    while index < parts.len() {
        let part = parts[index];
        if POSTAL_CODE_RE.is_match(part) && index + 1 < parts.len() {
            out.push(format!("{} {}", part, parts[index + 1]));
            index += 2;
        } else {
            out.push(part.to_string());
            index += 1;
        }
    }
    out.join(", ")
}
