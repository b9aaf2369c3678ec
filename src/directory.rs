//! Client for the host directory used by the `auto` scrape policy
//!
//! The directory answers a single GET with `{"hosts": ["...", ...]}`.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument, trace};

use crate::error::{PollError, PollResult};

const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    hosts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DirectoryClient {
    client: reqwest::Client,
    url: String,
}

impl DirectoryClient {
    pub fn new(url: impl Into<String>) -> PollResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(DIRECTORY_TIMEOUT)
            .build()
            .map_err(|e| PollError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the current host list
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch_hosts(&self) -> PollResult<Vec<String>> {
        trace!("requesting host list");

        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::DirectoryUnavailable(format!(
                "HTTP error: {status}"
            )));
        }

        let body: DirectoryResponse = response.json().await.map_err(|e| {
            PollError::DirectoryUnavailable(format!("failed to parse host list: {e}"))
        })?;

        debug!("directory returned {} hosts", body.hosts.len());
        Ok(body.hosts)
    }
}
