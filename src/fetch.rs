use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::settings::FetchSettings;

/// Fetch one URL and return its body. Non-2xx responses are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub fn from_settings(s: &FetchSettings) -> Self {
        RetryPolicy {
            max_attempts: s.max_attempts.max(1),
            base_backoff: Duration::from_millis(s.base_backoff_ms),
            retry_statuses: s.retry_statuses.clone(),
        }
    }

    pub fn is_retryable(&self, err: &FetchError) -> bool {
        match err {
            FetchError::Status { status, .. } => self.retry_statuses.contains(status),
            FetchError::Timeout { .. } => true,
            FetchError::Transport { .. } => false,
        }
    }

    /// Delay before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt)
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(settings.user_agent.as_str())
            .build()?;
        Ok(HttpFetcher {
            client,
            retry: RetryPolicy::from_settings(settings),
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| transport_error(url, e))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => {
                    debug!("Fetched {} ({} bytes)", url, body.len());
                    return Ok(body);
                }
                Err(e) if attempt + 1 < self.retry.max_attempts && self.retry.is_retryable(&e) => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        "{} (attempt {}/{}), backing off {:.1}s",
                        e,
                        attempt + 1,
                        self.retry.max_attempts,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            source: e,
        }
    }
}


#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fetcher(max_attempts: u32) -> HttpFetcher {
        let settings = FetchSettings {
            max_attempts,
            base_backoff_ms: 1,
            ..FetchSettings::default()
        };
        HttpFetcher::new(&settings, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::from_settings(&FetchSettings {
            base_backoff_ms: 100,
            ..FetchSettings::default()
        });
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn retryable_statuses() {
        let policy = RetryPolicy::from_settings(&FetchSettings::default());
        let status = |s| FetchError::Status {
            url: "u".into(),
            status: s,
        };
        assert!(policy.is_retryable(&status(429)));
        assert!(policy.is_retryable(&status(503)));
        assert!(!policy.is_retryable(&status(404)));
        assert!(policy.is_retryable(&FetchError::Timeout { url: "u".into() }));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3.4"))
            .mount(&server)
            .await;

        let body = fetcher(3)
            .fetch(&format!("{}/list", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "1.2.3.4");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let err = fetcher(3)
            .fetch(&format!("{}/list", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn non_retryable_status_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher(3)
            .fetch(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn slow_response_is_a_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let settings = FetchSettings {
            max_attempts: 1,
            ..FetchSettings::default()
        };
        let f = HttpFetcher::new(&settings, Duration::from_millis(50)).unwrap();
        let err = f.fetch(&server.uri()).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
