//! # Resource Loaders
//!
//! The pull side of the data layer. [`FetchCache`](crate::fetch::FetchCache)
//! decides *when* to load; a [`ResourceLoader`] only knows *how*.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Failure of one load attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// The source string could not be turned into a request.
    #[error("Invalid resource '{resource}': {reason}")]
    InvalidSource { resource: String, reason: String },

    /// Server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Request did not complete in time.
    #[error("Request to {0} timed out")]
    Timeout(String),

    /// Connection or transport failure.
    #[error("Request failed: {0}")]
    Request(String),

    /// Body was not the expected JSON.
    #[error("Invalid response body: {0}")]
    Decode(String),

    /// Failure reported by a custom loader.
    #[error("{0}")]
    Other(String),
}

impl LoadError {
    /// Returns true for server-side (5xx) statuses and transport failures.
    pub fn is_transient(&self) -> bool {
        match self {
            LoadError::Status { status, .. } => *status >= 500,
            LoadError::Timeout(_) | LoadError::Request(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        if err.is_timeout() {
            LoadError::Timeout(url)
        } else if let Some(status) = err.status() {
            LoadError::Status {
                status: status.as_u16(),
                url,
            }
        } else if err.is_decode() {
            LoadError::Decode(err.to_string())
        } else {
            LoadError::Request(err.to_string())
        }
    }
}

/// Loads one pull resource as JSON.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load(&self, source: &str) -> Result<Value, LoadError>;
}

// =============================================================================
// HTTP Loader
// =============================================================================

/// [`ResourceLoader`] that GETs `source` relative to a base URL.
///
/// Absolute `http(s)://` sources are used as-is.
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpLoader {
    /// Creates a loader for `base_url`.
    ///
    /// A trailing slash is added to the base path so relative sources resolve
    /// beneath it rather than replacing its last segment.
    pub fn new(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(ClientError::InvalidUrl(format!(
                "API base must be http or https, got: {}",
                base_url
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::InvalidConfig(e.to_string()))?;

        Ok(HttpLoader {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `source` against the base URL.
    pub fn resolve(&self, source: &str) -> Result<Url, LoadError> {
        let invalid = |reason: String| LoadError::InvalidSource {
            resource: source.to_string(),
            reason,
        };

        if source.starts_with("http://") || source.starts_with("https://") {
            return Url::parse(source).map_err(|e| invalid(e.to_string()));
        }
        self.base_url
            .join(source.trim_start_matches('/'))
            .map_err(|e| invalid(e.to_string()))
    }
}

#[async_trait]
impl ResourceLoader for HttpLoader {
    async fn load(&self, source: &str) -> Result<Value, LoadError> {
        let url = self.resolve(source)?;
        debug!(url = %url, "GET resource");

        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| LoadError::Decode(e.to_string()))
    }
}
