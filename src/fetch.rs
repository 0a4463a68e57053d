//! Memoized HTTP GET client
//!
//! Fetches pages with reqwest and keeps each response in the disk cache, so
//! repeated requests for the same URL within the TTL never touch the network.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::cache::{CacheError, CachedValue, CallArgs, MemoError, Memoizer};

/// Cache identity for GET requests made by [`PageClient`]
pub const PAGE_IDENTITY: &str = "page_client.get";

/// Default request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when fetching a page
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Cache directory is unusable
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<MemoError<reqwest::Error>> for FetchError {
    fn from(err: MemoError<reqwest::Error>) -> Self {
        match err {
            MemoError::Call(e) => Self::Http(e),
            MemoError::Cache(e) => Self::Cache(e),
        }
    }
}

/// A fetched response, as stored in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    /// When the request was actually made
    pub fetched_at: DateTime<Utc>,
}

/// HTTP client whose GET responses are memoized on disk
#[derive(Debug, Clone)]
pub struct PageClient {
    http_client: Client,
    memoizer: Memoizer,
}

impl PageClient {
    /// Builds the HTTP client with the request timeout applied
    ///
    /// Fails when the TLS backend cannot be initialised.
    pub fn new(memoizer: Memoizer) -> Result<Self, FetchError> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http_client,
            memoizer,
        })
    }

    /// Arguments fingerprinted for a GET of `url`
    pub fn call_args(url: &str) -> Result<CallArgs, CacheError> {
        CallArgs::new().arg(url)?.named("method", "GET")
    }

    /// Fetches `url`, serving it from the cache when a live entry exists
    ///
    /// Non-2xx responses are cached like any other response; only transport
    /// failures are errors.
    pub async fn get(&self, url: &str) -> Result<CachedValue<FetchedPage>, FetchError> {
        let args = Self::call_args(url)?;
        let page = self
            .memoizer
            .resolve_async(PAGE_IDENTITY, &args, || self.fetch_from_network(url))
            .await?;
        Ok(page)
    }

    async fn fetch_from_network(&self, url: &str) -> Result<FetchedPage, reqwest::Error> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(FetchedPage {
            url: url.to_string(),
            status,
            content_type,
            body,
            fetched_at: Utc::now(),
        })
    }
}
