use anyhow::Context;
use rand::Rng;
use reqwest::{Client, StatusCode};
use std::ops::RangeInclusive;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("giving up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },

    #[error("session already closed")]
    Closed,
}

/// Delay and retry bounds for listing requests
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before every request, in milliseconds
    pub jitter_ms: RangeInclusive<u64>,
    /// Wait between failed attempts, in milliseconds
    pub backoff_ms: RangeInclusive<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            jitter_ms: 1_000..=2_000,
            backoff_ms: 2_000..=5_000,
        }
    }
}

impl RetryPolicy {
    fn pick(range: &RangeInclusive<u64>) -> Duration {
        if range.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(range.clone()))
    }

    fn jitter(&self) -> Duration {
        Self::pick(&self.jitter_ms)
    }

    fn backoff(&self) -> Duration {
        Self::pick(&self.backoff_ms)
    }
}

/// Cookie-keeping HTTP session used for every request against the site
pub struct Fetcher {
    client: Mutex<Option<Client>>,
    home_url: String,
    policy: RetryPolicy,
    warmed_up: OnceCell<()>,
}

impl Fetcher {
    pub fn new(home_url: impl Into<String>, policy: RetryPolicy) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .default_headers(default_headers())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client: Mutex::new(Some(client)),
            home_url: home_url.into(),
            policy,
            warmed_up: OnceCell::new(),
        })
    }

    fn client(&self) -> Result<Client, FetchError> {
        self.client
            .lock()
            .map_err(|_| FetchError::Closed)?
            .clone()
            .ok_or(FetchError::Closed)
    }

    /// Visit the home page once so the site sets its session cookies.
    ///
    /// A failed warm-up is logged and not retried; the search requests that
    /// follow still run.
    async fn warm_up(&self) {
        self.warmed_up
            .get_or_init(|| async {
                info!("Initializing HTTP session via {}", self.home_url);
                match self.get_once(&self.home_url).await {
                    Ok(_) => info!("Session initialized"),
                    Err(e) => warn!("Session warm-up failed: {}", e),
                }
            })
            .await;
    }

    async fn get_once(&self, url: &str) -> Result<String, FetchError> {
        let client = self.client()?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        response.text().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })
    }

    /// Fetch one search page with jitter before each attempt and randomized
    /// backoff between failed attempts.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.warm_up().await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            tokio::time::sleep(self.policy.jitter()).await;
            debug!("GET {} (attempt {}/{})", url, attempt, self.policy.max_attempts);

            match self.get_once(url).await {
                Ok(body) => {
                    debug!("Downloaded {} bytes of HTML", body.len());
                    return Ok(body);
                }
                Err(FetchError::Closed) => return Err(FetchError::Closed),
                Err(e) if attempt >= self.policy.max_attempts => {
                    warn!("Max retries reached for {}: {}", url, e);
                    return Err(FetchError::Exhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        "Request failed (attempt {}/{}): {}",
                        attempt, self.policy.max_attempts, e
                    );
                    tokio::time::sleep(self.policy.backoff()).await;
                }
            }
        }
    }

    /// Drop the session; later fetches fail with [`FetchError::Closed`].
    pub fn close(&self) {
        if let Ok(mut client) = self.client.lock() {
            if client.take().is_some() {
                info!("Closed HTTP session");
            }
        }
    }
}

fn default_headers() -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};

    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,de;q=0.8"),
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers
}

#[cfg(test)]
pub(crate) fn instant_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        jitter_ms: 0..=0,
        backoff_ms: 0..=0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn warms_up_once_and_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lst/bmw"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .expect(2)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(server.uri(), instant_policy()).unwrap();
        let url = format!("{}/lst/bmw", server.uri());
        assert_eq!(fetcher.fetch(&url).await.unwrap(), "<html>ok</html>");
        assert_eq!(fetcher.fetch(&url).await.unwrap(), "<html>ok</html>");
    }

    #[tokio::test]
    async fn retries_then_gives_up_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lst/bmw"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(server.uri(), instant_policy()).unwrap();
        let err = fetcher
            .fetch(&format!("{}/lst/bmw", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lst/bmw"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lst/bmw"))
            .respond_with(ResponseTemplate::new(200).set_body_string("second"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(server.uri(), instant_policy()).unwrap();
        let body = fetcher
            .fetch(&format!("{}/lst/bmw", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "second");
    }

    #[tokio::test]
    async fn closed_session_refuses_requests() {
        let fetcher = Fetcher::new("http://127.0.0.1:9", instant_policy()).unwrap();
        fetcher.close();
        let err = fetcher.fetch("http://127.0.0.1:9/lst").await.unwrap_err();
        assert!(matches!(err, FetchError::Closed));
    }
}
