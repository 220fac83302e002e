//! Shared HTTP client with bounded retries

use crate::{IngestError, IngestResult};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const USER_AGENT: &str = concat!("airmon/", env!("CARGO_PKG_VERSION"));

/// JSON-over-HTTP client; transient failures are retried with exponential
/// backoff before an error is surfaced
#[derive(Clone)]
pub struct HttpFetcher {
    client: ClientWithMiddleware,
    request_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(max_retries: u32, request_timeout: Duration) -> IngestResult<Self> {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(Client::builder().user_agent(USER_AGENT).build()?)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            request_timeout,
        })
    }

    /// GET `url` and decode the body. Only the path is logged, since
    /// provider credentials travel in the query string.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> IngestResult<T> {
        let endpoint = url.path().to_string();
        debug!(%endpoint, "requesting");

        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Status {
                status: status.as_u16(),
                endpoint,
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Parse a provider base URL, making sure relative joins append to it
pub fn base_url(raw: &str) -> IngestResult<Url> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized)
        .map_err(|e| IngestError::FeedError(format!("invalid base url {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let url = base_url("https://api.openweathermap.org/data/2.5").unwrap();
        assert_eq!(
            url.join("weather").unwrap().as_str(),
            "https://api.openweathermap.org/data/2.5/weather"
        );
        assert!(base_url("not a url").is_err());
    }

    #[test]
    fn test_fetcher_builds() {
        assert!(HttpFetcher::new(2, Duration::from_secs(10)).is_ok());
    }
}
