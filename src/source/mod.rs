//! Sources: one per configured integration
//!
//! A source owns an adapter (through its [`FleetQuery`]), decides which
//! targets to poll, runs one query cycle per probe and maps the raw readings
//! into a [`ValueSet`].
//!
//! ## Scrape policies
//!
//! - **manual**: the configured target list
//! - **auto**: the list returned by the host directory, fetched once when the
//!   source is built (an unreachable directory yields an empty list)
//! - **all**: whatever the adapter enumerates, re-read every cycle
//!
//! [`FleetQuery`]: crate::orchestrator::FleetQuery

pub mod dell;
pub mod snmp;
pub mod vsphere;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::adapter::TargetAdapter;
use crate::directory::DirectoryClient;
use crate::error::{PollResult, TargetError};
use crate::orchestrator::QueryOptions;
use crate::values::ValueSet;

/// A pollable integration
#[async_trait]
pub trait Source: Send {
    /// Display name used for logging and export
    fn name(&self) -> &str;

    /// Run one polling cycle
    ///
    /// Per-target failures are logged and leave the target out of the
    /// result. Only value-set schema violations are returned as errors.
    async fn probe(&mut self) -> PollResult<ValueSet>;
}

/// How a source picks its targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapePolicy {
    Manual(Vec<String>),
    Auto { directory_url: String },
    All,
}

/// Target list resolved from a [`ScrapePolicy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPlan {
    /// Same targets every cycle
    Fixed(Vec<String>),

    /// Ask the adapter every cycle
    Discover,
}

impl TargetPlan {
    /// Resolve a policy; `auto` queries the directory exactly once here
    pub async fn from_policy(policy: ScrapePolicy, source: &str) -> Self {
        match policy {
            ScrapePolicy::Manual(targets) => TargetPlan::Fixed(targets),
            ScrapePolicy::Auto { directory_url } => {
                TargetPlan::Fixed(discover_hosts(&directory_url, source).await)
            }
            ScrapePolicy::All => TargetPlan::Discover,
        }
    }

    /// Targets to poll in the coming cycle
    pub async fn targets(&self, adapter: &dyn TargetAdapter, source: &str) -> Vec<String> {
        match self {
            TargetPlan::Fixed(targets) => targets.clone(),
            TargetPlan::Discover => match adapter.list_targets().await {
                Ok(targets) => targets,
                Err(e) => {
                    error!("{source}: failed to list targets: {e}");
                    vec![]
                }
            },
        }
    }

    /// Size the worker pool: fixed plans never get more workers than targets
    pub fn size_options(&self, options: QueryOptions) -> QueryOptions {
        match self {
            TargetPlan::Fixed(targets) => options.sized_for(targets.len()),
            TargetPlan::Discover => options,
        }
    }
}

async fn discover_hosts(directory_url: &str, source: &str) -> Vec<String> {
    let hosts = match DirectoryClient::new(directory_url) {
        Ok(client) => client.fetch_hosts().await,
        Err(e) => Err(e),
    };

    match hosts {
        Ok(hosts) => {
            info!("{source}: discovered {} hosts", hosts.len());
            hosts
        }
        Err(e) => {
            error!("{source}: {e}, polling no targets");
            vec![]
        }
    }
}

/// Wall-clock timestamp as fractional unix seconds
pub(crate) fn unix_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}

/// Log a target that produced no readings this cycle
pub(crate) fn log_missing(source: &str, target: &str, error: &TargetError) {
    warn!("{source}: no data found for {target}: {error}");
}

/// Refresh the adapter's session before a cycle if it went stale
pub(crate) async fn ensure_connected(adapter: &Arc<dyn TargetAdapter>, source: &str) {
    if adapter.is_connected().await {
        return;
    }

    info!("{source}: connection lost, reconnecting");
    if let Err(e) = adapter.reconnect().await {
        error!("{source}: reconnect failed: {e:#}");
    }
}
