use chrono::Utc;
use futures::StreamExt;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::parser::{parse_jobs, JobRecord};
use crate::config::Config;
use crate::storage::Feed;
use crate::util::{redact_query_param, resolve_client_ip};

/// Per-request timeout, covering connect through the end of the body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

const DEFAULT_LIMIT: u32 = 10;
const DEFAULT_PAGE: u32 = 1;

/// Query parameter carrying the publisher credential.
const PUBLISHER_PARAM: &str = "publisher";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    /// No publisher credential is configured. No request was made.
    #[error("Publisher ID is not configured")]
    Configuration,

    /// Network failure or timeout.
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Upstream API returned HTTP {status}")]
    Upstream { status: u16 },

    #[error("Response exceeds {} byte limit", MAX_RESPONSE_SIZE)]
    ResponseTooLarge,

    #[error("Failed to parse XML response: {detail}")]
    Parse { detail: String },
}

// ============================================================================
// Request Types
// ============================================================================

/// Caller identity reported to the upstream API on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_ip: String,
    pub user_agent: String,
}

impl RequestContext {
    pub fn new(user_ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            user_ip: user_ip.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Build from configuration. A configured address that is not public is
    /// replaced by the loopback fallback.
    pub fn from_config(config: &Config) -> Self {
        Self {
            user_ip: resolve_client_ip(config.user_ip.as_deref()),
            user_agent: config.user_agent(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Search parameters for one upstream request. Unset fields take the
/// client defaults (`limit` 10, `page` 1, identity from [`RequestContext`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pub keyword: String,
    pub location: String,
    pub limit: Option<u32>,
    pub page: Option<u32>,
    pub user_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl SearchParams {
    pub fn for_feed(feed: &Feed) -> Self {
        Self {
            keyword: feed.keyword.clone(),
            location: feed.location.clone(),
            limit: Some(feed.limit),
            page: Some(feed.page),
            ..Self::default()
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Client for the WhatJobs XML search API.
///
/// The HTTP client, endpoint, credential and caller identity are all supplied
/// by the caller, so tests can point it at a local mock server.
pub struct JobsApi {
    client: reqwest::Client,
    base_url: Url,
    publisher_id: Option<SecretString>,
    context: RequestContext,
}

impl JobsApi {
    pub fn new(
        client: reqwest::Client,
        base_url: Url,
        publisher_id: Option<SecretString>,
        context: RequestContext,
    ) -> Self {
        Self {
            client,
            base_url,
            publisher_id,
            context,
        }
    }

    /// Build the request URL for `params`.
    ///
    /// Fails with [`ApiError::Configuration`] when no credential is set, so a
    /// request is never sent without one.
    pub fn build_url(&self, params: &SearchParams) -> Result<Url, ApiError> {
        let publisher = self
            .publisher_id
            .as_ref()
            .map(|p| p.expose_secret().trim())
            .filter(|p| !p.is_empty())
            .ok_or(ApiError::Configuration)?;

        let user_ip = params
            .user_ip
            .as_deref()
            .unwrap_or(self.context.user_ip.as_str());
        let user_agent = self.user_agent_for(params);

        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(PUBLISHER_PARAM, publisher);
            query.append_pair("user_ip", user_ip);
            query.append_pair("user_agent", user_agent);
            if !params.keyword.trim().is_empty() {
                query.append_pair("keyword", params.keyword.trim());
            }
            if !params.location.trim().is_empty() {
                query.append_pair("location", params.location.trim());
            }
            query.append_pair("limit", &params.limit.unwrap_or(DEFAULT_LIMIT).to_string());
            query.append_pair("page", &params.page.unwrap_or(DEFAULT_PAGE).to_string());
        }
        Ok(url)
    }

    fn user_agent_for<'a>(&'a self, params: &'a SearchParams) -> &'a str {
        params
            .user_agent
            .as_deref()
            .unwrap_or(self.context.user_agent.as_str())
    }

    /// Query the API and parse the response into job records.
    ///
    /// An empty result set is `Ok(vec![])`, never an error.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Configuration`]: no credential (no request made)
    /// - [`ApiError::Transport`]: network failure or timeout
    /// - [`ApiError::Upstream`]: any status other than 200
    /// - [`ApiError::ResponseTooLarge`]: body exceeds 10MB
    /// - [`ApiError::Parse`]: body is not well-formed XML
    pub async fn fetch_jobs(&self, params: &SearchParams) -> Result<Vec<JobRecord>, ApiError> {
        let url = self.build_url(params)?;
        let shown = redact_query_param(&url, PUBLISHER_PARAM);
        tracing::info!(url = %shown, "Fetching jobs");

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, self.user_agent_for(params))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                // reqwest errors embed the full URL, credential included
                let e = e.without_url();
                tracing::warn!(url = %shown, error = %e, "Jobs request failed");
                ApiError::Transport(e)
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(url = %shown, status = status.as_u16(), "Jobs API returned error status");
            return Err(ApiError::Upstream {
                status: status.as_u16(),
            });
        }

        let bytes = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;

        let jobs = parse_jobs(&bytes, Utc::now()).map_err(|detail| {
            tracing::warn!(url = %shown, error = %detail, "Jobs response is not valid XML");
            ApiError::Parse { detail }
        })?;

        tracing::debug!(count = jobs.len(), "Parsed jobs response");
        Ok(jobs)
    }

    /// Check the API with a minimal query (`keyword=test`, `limit=1`).
    pub async fn test_connection(&self) -> Result<(), ApiError> {
        let params = SearchParams {
            keyword: "test".to_string(),
            limit: Some(1),
            ..SearchParams::default()
        };
        self.fetch_jobs(&params).await.map(|_| ())
    }
}

impl std::fmt::Debug for JobsApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobsApi")
            .field("base_url", &self.base_url.as_str())
            .field(
                "publisher_id",
                &self.publisher_id.as_ref().map(|_| "[REDACTED]"),
            )
            .field("context", &self.context)
            .finish()
    }
}

/// Read a response body, failing once it exceeds `limit` bytes.
async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, ApiError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ApiError::Transport(e.without_url()))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
