use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

const DEFAULT_ORIGIN_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("invalid url {0}")]
    Url(String),
    #[error("request failed for {url}: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("unable to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

struct OriginState {
    delay: Duration,
    last_request: Option<Instant>,
}

/// Outbound HTTP with a caller identity and per-origin politeness.
///
/// Requests go out one at a time; successive requests to one host are spaced
/// by that host's minimum delay.
pub struct HttpClient {
    client: Client,
    user_agent: String,
    default_delay: Duration,
    origins: AsyncMutex<HashMap<String, OriginState>>,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|source| HttpError::Request {
                url: String::new(),
                source,
            })?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            default_delay: DEFAULT_ORIGIN_DELAY,
            origins: AsyncMutex::new(HashMap::new()),
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub async fn set_origin_delay(&self, url: &str, delay: Duration) {
        let Some(host) = host_of(url) else {
            return;
        };
        let mut origins = self.origins.lock().await;
        origins
            .entry(host)
            .and_modify(|state| state.delay = delay)
            .or_insert(OriginState {
                delay,
                last_request: None,
            });
    }

    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let parsed = Url::parse(url).map_err(|_| HttpError::Url(url.to_string()))?;
        let host = parsed
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| HttpError::Url(url.to_string()))?;

        // Holding the lock for the whole exchange keeps one request in flight.
        let mut origins = self.origins.lock().await;
        let state = origins.entry(host).or_insert(OriginState {
            delay: self.default_delay,
            last_request: None,
        });
        if let Some(previous) = state.last_request {
            let elapsed = previous.elapsed();
            if elapsed < state.delay {
                sleep(state.delay - elapsed).await;
            }
        }
        state.last_request = Some(Instant::now());

        tracing::debug!(url, "GET");
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|source| HttpError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(|err| HttpError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|err| HttpError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }
}

pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_ok() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                    )
                    .await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/")
    }

    #[test]
    fn origin_and_host_extraction() {
        assert_eq!(
            origin_of("https://www.Berlin.de/polizei/index.php?q=1").as_deref(),
            Some("https://www.berlin.de")
        );
        assert_eq!(
            origin_of("http://127.0.0.1:8080/a").as_deref(),
            Some("http://127.0.0.1:8080")
        );
        assert_eq!(host_of("https://Example.org/x").as_deref(), Some("example.org"));
        assert!(host_of("not a url").is_none());
    }

    #[tokio::test]
    async fn unreachable_origin_is_a_request_error() {
        let http = HttpClient::new("test-agent", Duration::from_secs(2)).unwrap();
        http.set_origin_delay("http://127.0.0.1:9/", Duration::from_millis(0))
            .await;
        let err = http.get_text("http://127.0.0.1:9/robots.txt").await.unwrap_err();
        assert!(matches!(err, HttpError::Request { .. }));
    }

    #[tokio::test]
    async fn requests_to_one_origin_are_spaced_by_its_delay() {
        let base = serve_ok().await;
        let http = HttpClient::new("test-agent", Duration::from_secs(2)).unwrap();
        http.set_origin_delay(&base, Duration::from_millis(400)).await;

        let started = Instant::now();
        for page in ["a", "b", "c"] {
            assert_eq!(http.get_text(&format!("{base}{page}")).await.unwrap(), "ok");
        }
        assert!(started.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_without_request() {
        let http = HttpClient::new("test-agent", Duration::from_secs(2)).unwrap();
        assert!(matches!(
            http.get_text("::nope").await,
            Err(HttpError::Url(_))
        ));
    }
}
