use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::retry::{RetryPolicy, Retryable};

/// Used when the lookup fails or returns nothing (Pakistan).
pub const DEFAULT_LOCATION_ID: &str = "1127408";

/// Turns a free-text location into Glassdoor's internal location id.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn location_id(&self, location: &str) -> Result<Option<String>>;
}

/// Resolve `location`, substituting [`DEFAULT_LOCATION_ID`] on any failure.
pub async fn resolve_or_default(resolver: &dyn LocationResolver, location: &str) -> String {
    match resolver.location_id(location).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            warn!(location, "No location id returned, using default");
            DEFAULT_LOCATION_ID.to_string()
        }
        Err(e) => {
            warn!(location, error = %e, "Location lookup failed, using default");
            DEFAULT_LOCATION_ID.to_string()
        }
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("location lookup request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("location lookup answered {0}")]
    Status(StatusCode),

    #[error("location lookup body is not valid JSON: {0}")]
    Body(#[source] reqwest::Error),
}

impl Retryable for LookupError {
    /// Connection problems, rate limiting and server errors may pass; a
    /// block or a malformed answer will not.
    fn is_retryable(&self) -> bool {
        match self {
            LookupError::Transport(_) => true,
            LookupError::Status(status) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            LookupError::Body(_) => false,
        }
    }
}

#[derive(Clone)]
pub struct GlassdoorLocations {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl GlassdoorLocations {
    pub fn new(base_url: String, user_agent: &str, retry: RetryPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).context("invalid user agent")?,
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()
            .context("Failed to build location lookup client")?;

        Ok(Self {
            base_url,
            client,
            retry,
        })
    }

    async fn fetch(&self, location: &str) -> Result<Option<String>, LookupError> {
        let url = format!("{}/findPopularLocationAjax.htm", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("term", location)])
            .send()
            .await
            .map_err(LookupError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status));
        }

        let body: serde_json::Value = response.json().await.map_err(LookupError::Body)?;
        Ok(first_location_id(&body))
    }
}

#[async_trait]
impl LocationResolver for GlassdoorLocations {
    async fn location_id(&self, location: &str) -> Result<Option<String>> {
        let id = self
            .retry
            .run("glassdoor_location", || self.fetch(location))
            .await?;
        Ok(id)
    }
}

/// `locationId` of the first suggestion; the API returns it as a number
/// or a string depending on the endpoint version.
fn first_location_id(body: &serde_json::Value) -> Option<String> {
    let id = body.as_array()?.first()?.get("locationId")?;
    match id {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}
