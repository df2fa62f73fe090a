use std::time::Duration;

use async_trait::async_trait;
use binder_core::BinderConfig;
use reqwest::Client;
use shared::error::BinderError;
use tracing::warn;
use url::Url;

/// Retrieves the markup a frame splices into its mount point.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, BinderError>;
}

pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    /// A zero `request_timeout_secs` disables the request timeout.
    pub fn new(config: &BinderConfig) -> Result<Self, BinderError> {
        let mut builder = Client::builder();
        if config.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
        }
        let http = builder.build().map_err(|err| {
            BinderError::configuration("HttpFetcher", "http", format!("client setup failed: {err}"))
        })?;
        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, BinderError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|err| BinderError::network(url.as_str(), err.to_string()))?;

        // Error pages are still markup; the body is spliced like any other.
        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, %status, "frame content request returned non-success status");
        }

        response
            .text()
            .await
            .map_err(|err| BinderError::network(url.as_str(), err.to_string()))
    }
}
