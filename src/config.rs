use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

use crate::adapters::openmanage::OpenManageClient;
use crate::adapters::snmp::SnmpCommand;
use crate::error::{PollError, PollResult};
use crate::orchestrator::QueryOptions;
use crate::source::dell::DellPowerSource;
use crate::source::snmp::{SnmpMetric, SnmpSource};
use crate::source::{ScrapePolicy, Source};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    DellOpenmanage(DellConfig),
    Vsphere(VSphereConfig),
    SnmpGet(SnmpConfig),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapePolicyKind {
    #[default]
    Manual,
    Auto,
    All,
}

/// Options every source understands
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CommonConfig {
    pub name: Option<String>,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default)]
    pub scrape_policy: ScrapePolicyKind,
    pub targets: Option<Vec<String>>,
    pub directory_url: Option<String>,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    pub batch_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DellConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub ome_endpoint: String,
    pub username_env_var: String,
    pub password_env_var: String,
    #[serde(default)]
    pub verify_tls: bool,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct VSphereConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub vsphere_endpoint: String,
    pub username_env_var: String,
    pub password_env_var: String,
    /// Counter names to request; all available counters when absent
    pub counters: Option<Vec<String>>,
}

/// SNMP GET of a single device
///
/// Polls exactly `host`. The target selection fields of [`CommonConfig`]
/// (`scrape_policy`, `targets`, `directory_url`) are rejected by
/// [`SnmpConfig::validate`], and `worker_threads` is clamped to one.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SnmpConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub host: String,
    pub community_env_var: Option<String>,
    #[serde(default = "default_snmp_version")]
    pub version: String,
    #[serde(default = "default_snmp_binary")]
    pub binary: String,
    pub metrics: Vec<SnmpMetric>,
}

fn default_interval() -> u64 {
    30
}

fn default_worker_threads() -> usize {
    8
}

fn default_call_timeout() -> u64 {
    10
}

fn default_snmp_version() -> String {
    "2c".to_string()
}

fn default_snmp_binary() -> String {
    "snmpget".to_string()
}

const DELL_BATCH_TIMEOUT: u64 = 15;
const VSPHERE_BATCH_TIMEOUT: u64 = 60;
const SNMP_BATCH_TIMEOUT: u64 = 15;
const DEFAULT_COMMUNITY: &str = "public";

impl CommonConfig {
    pub fn scrape_policy(&self) -> PollResult<ScrapePolicy> {
        match self.scrape_policy {
            ScrapePolicyKind::Manual => self
                .targets
                .clone()
                .map(ScrapePolicy::Manual)
                .ok_or_else(|| PollError::Config("manual scrape policy requires targets".into())),
            ScrapePolicyKind::Auto => self
                .directory_url
                .clone()
                .map(|directory_url| ScrapePolicy::Auto { directory_url })
                .ok_or_else(|| {
                    PollError::Config("auto scrape policy requires directory_url".into())
                }),
            ScrapePolicyKind::All => Ok(ScrapePolicy::All),
        }
    }

    pub fn query_options(&self, default_batch_timeout: u64) -> QueryOptions {
        QueryOptions {
            workers: self.worker_threads,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            batch_timeout: Duration::from_secs(
                self.batch_timeout_secs.unwrap_or(default_batch_timeout),
            ),
            requested_counters: None,
        }
    }
}

impl SourceConfig {
    pub fn common(&self) -> &CommonConfig {
        match self {
            SourceConfig::DellOpenmanage(config) => &config.common,
            SourceConfig::Vsphere(config) => &config.common,
            SourceConfig::SnmpGet(config) => &config.common,
        }
    }

    /// Configured name, falling back to the integration's endpoint
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.common().name {
            return name.clone();
        }

        match self {
            SourceConfig::DellOpenmanage(config) => format!("ome:{}", config.ome_endpoint),
            SourceConfig::Vsphere(config) => format!("vsphere:{}", config.vsphere_endpoint),
            SourceConfig::SnmpGet(config) => format!("snmp:{}", config.host),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.common().interval.max(1))
    }
}

impl VSphereConfig {
    /// Credentials for the embedder's SDK adapter
    pub fn credentials(&self) -> anyhow::Result<(String, String)> {
        Ok((
            resolve_env(&self.username_env_var)?,
            resolve_env(&self.password_env_var)?,
        ))
    }

    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            requested_counters: self.counters.clone(),
            ..self.common.query_options(VSPHERE_BATCH_TIMEOUT)
        }
    }
}

impl SnmpConfig {
    pub fn validate(&self) -> PollResult<()> {
        if self.common.scrape_policy != ScrapePolicyKind::Manual
            || self.common.targets.is_some()
            || self.common.directory_url.is_some()
        {
            return Err(PollError::Config(
                "snmp_get polls its host only, scrape_policy, targets and directory_url are not supported"
                    .into(),
            ));
        }

        self.metrics.iter().try_for_each(SnmpMetric::validate)
    }
}

/// Read a credential from the environment variable it is referenced by
pub fn resolve_env(var: &str) -> anyhow::Result<String> {
    std::env::var(var).with_context(|| format!("environment variable {var} is not set"))
}

/// Build the source described by a config entry
///
/// vSphere sources need an SDK adapter and are built by the embedder through
/// [`VSphereSource::new`](crate::source::vsphere::VSphereSource::new).
pub async fn build_source(config: &SourceConfig) -> anyhow::Result<Box<dyn Source>> {
    let name = config.display_name();

    match config {
        SourceConfig::DellOpenmanage(dell) => {
            let policy = dell.common.scrape_policy()?;
            let adapter = OpenManageClient::connect(
                &dell.ome_endpoint,
                resolve_env(&dell.username_env_var)?,
                resolve_env(&dell.password_env_var)?,
                dell.verify_tls,
            )
            .await
            .with_context(|| format!("{name}: failed to connect to OpenManage"))?;

            let source = DellPowerSource::new(
                name,
                policy,
                dell.common.query_options(DELL_BATCH_TIMEOUT),
                Arc::new(adapter),
            )
            .await;
            Ok(Box::new(source))
        }
        SourceConfig::SnmpGet(snmp) => {
            snmp.validate()?;
            let community = match &snmp.community_env_var {
                Some(var) => resolve_env(var)?,
                None => DEFAULT_COMMUNITY.to_string(),
            };
            let adapter = SnmpCommand::new(community)
                .with_binary(&snmp.binary)
                .with_version(&snmp.version);

            let source = SnmpSource::new(
                name,
                &snmp.host,
                &snmp.metrics,
                snmp.common.query_options(SNMP_BATCH_TIMEOUT),
                Arc::new(adapter),
            );
            Ok(Box::new(source))
        }
        SourceConfig::Vsphere(_) => {
            anyhow::bail!("{name}: vSphere sources require an SDK adapter supplied by the embedder")
        }
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
