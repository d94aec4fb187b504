use super::api_key::ApiKey;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Header carrying the key on Gemini-style endpoints
pub const DEFAULT_KEY_HEADER: &str = "x-goog-api-key";

/// A cheap provider call used to check a key without organic traffic
#[async_trait]
pub trait KeyProbe: Send + Sync {
    async fn probe(&self, key: &ApiKey) -> Result<()>;
}

/// Probe that issues `GET <url>` with the key in a request header.
///
/// Listing models is free on most providers, which makes it a good no-op.
#[derive(Debug, Clone)]
pub struct HttpKeyProbe {
    client: reqwest::Client,
    url: Url,
    key_header: String,
    timeout: Duration,
}

impl HttpKeyProbe {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::InvalidInput {
            field: "probe.url".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            key_header: DEFAULT_KEY_HEADER.to_string(),
            timeout,
        })
    }

    /// Send the key in a different header
    #[must_use]
    pub fn with_key_header(mut self, header: impl Into<String>) -> Self {
        self.key_header = header.into();
        self
    }

    fn map_transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::NetworkTimeout {
                timeout: self.timeout,
                message: format!("Probe to {} timed out: {e}", self.url),
            }
        } else if e.is_connect() {
            Error::ConnectionRefused {
                endpoint: self.url.to_string(),
            }
        } else {
            Error::Http(e)
        }
    }
}

#[async_trait]
impl KeyProbe for HttpKeyProbe {
    async fn probe(&self, key: &ApiKey) -> Result<()> {
        debug!(key_id = %key.id(), url = %self.url, "Probing API key");

        let response = self
            .client
            .get(self.url.clone())
            .header(self.key_header.as_str(), key.expose_secret())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(Error::RateLimitExceeded { retry_after });
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::Provider {
            status: Some(status.as_u16()),
            message: body.chars().take(200).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_url() {
        let result = HttpKeyProbe::new("not a url", Duration::from_secs(1));
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }

    #[test]
    fn test_custom_header() {
        let probe = HttpKeyProbe::new("https://example.com/v1/models", Duration::from_secs(1))
            .unwrap()
            .with_key_header("authorization");
        assert_eq!(probe.key_header, "authorization");
    }
}
