//! Dell OpenManage Enterprise REST adapter
//!
//! ## Protocol
//!
//! 1. `POST /api/SessionService/Sessions` with credentials, the session token
//!    comes back in the `X-Auth-Token` header (status 201)
//! 2. `GET /api/DeviceService/Devices?$skip=0&$top=500` lists devices, mapping
//!    `DeviceName` to `Id`
//! 3. `GET /api/DeviceService/Devices(<id>)/Power` returns the power readings
//!
//! Devices are registered under their management controller name, which
//! carries an `mp` infix before the first domain separator
//! (`node1.dc.example` is registered as `node1mp.dc.example`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, trace, warn};

use crate::adapter::{ProviderId, ReadingSet, TargetAdapter};
use crate::error::TargetError;
use crate::source::dell::{ENERGY_CONSUMPTION, POWER};

const AUTH_HEADER: &str = "X-Auth-Token";
const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(10);

/// Counter name of the timestamp the energy reading refers to
pub const ENERGY_CONSUMPTION_TS: &str = "system_energy_consumption_ts";

#[derive(Debug, Deserialize)]
struct DeviceList {
    value: Vec<Device>,
}

#[derive(Debug, Deserialize)]
struct Device {
    #[serde(rename = "Id")]
    id: u64,
    #[serde(rename = "DeviceName")]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PowerResponse {
    power: Option<serde_json::Value>,
    system_energy_consumption: Option<serde_json::Value>,
    #[serde(rename = "systemEnergyConsumptionTimeStamp")]
    system_energy_consumption_timestamp: Option<serde_json::Value>,
}

/// Numbers may arrive as JSON numbers or numeric strings
fn numeric(value: &Option<serde_json::Value>) -> Option<f64> {
    match value.as_ref()? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Name under which OpenManage registers a host
pub fn management_name(device_name: &str) -> String {
    match device_name.find('.') {
        Some(dot) => format!("{}mp{}", &device_name[..dot], &device_name[dot..]),
        None => format!("{device_name}mp"),
    }
}

pub struct OpenManageClient {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
    token: RwLock<Option<String>>,
    devices: RwLock<HashMap<String, u64>>,
}

impl OpenManageClient {
    /// Open a session and load the device directory
    pub async fn connect(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        verify_tls: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .context("failed to build HTTP client")?;

        let adapter = Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            token: RwLock::new(None),
            devices: RwLock::new(HashMap::new()),
        };

        adapter.open_session().await?;
        Ok(adapter)
    }

    async fn open_session(&self) -> Result<()> {
        let token = self.create_session().await?;
        *self.token.write().await = Some(token);

        let devices = self.load_devices().await?;
        info!("OME: loaded {} devices", devices.len());
        *self.devices.write().await = devices;

        Ok(())
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn create_session(&self) -> Result<String> {
        let url = format!("{}/api/SessionService/Sessions", self.endpoint);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "UserName": self.username, "Password": self.password }))
            .timeout(DIRECTORY_TIMEOUT)
            .send()
            .await
            .context("failed to send session request")?;

        if response.status() != reqwest::StatusCode::CREATED {
            anyhow::bail!("could not create OME session: HTTP {}", response.status());
        }

        let token = response
            .headers()
            .get(AUTH_HEADER)
            .context("session response is missing the auth token")?
            .to_str()
            .context("auth token is not valid text")?
            .to_string();

        debug!("created OME session");
        Ok(token)
    }

    async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Drop a token the server no longer accepts so the next cycle reconnects
    async fn expire_session(&self) {
        if self.token.write().await.take().is_some() {
            warn!("OME: session rejected, marking it stale");
        }
    }

    async fn load_devices(&self) -> Result<HashMap<String, u64>> {
        let url = format!("{}/api/DeviceService/Devices?$skip=0&$top=500", self.endpoint);
        let token = self.token().await.context("no OME session")?;

        let response = self
            .client
            .get(&url)
            .header(AUTH_HEADER, token)
            .timeout(DIRECTORY_TIMEOUT)
            .send()
            .await
            .context("failed to request device list")?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.expire_session().await;
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("device list request failed: HTTP {status}: {body}");
        }

        let list: DeviceList = response
            .json()
            .await
            .context("failed to parse device list")?;

        Ok(list
            .value
            .into_iter()
            .map(|device| (device.name, device.id))
            .collect())
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> TargetError {
    if err.is_timeout() {
        TargetError::Timeout(timeout)
    } else {
        TargetError::Failure(err.to_string())
    }
}

#[async_trait]
impl TargetAdapter for OpenManageClient {
    async fn resolve(&self, target_name: &str) -> Result<ProviderId, TargetError> {
        let devices = self.devices.read().await;

        devices
            .get(&management_name(target_name))
            .or_else(|| devices.get(target_name))
            .map(ProviderId::new)
            .ok_or_else(|| TargetError::NotFound(target_name.to_string()))
    }

    #[instrument(skip(self, _requested), fields(device = %id))]
    async fn fetch(
        &self,
        id: &ProviderId,
        _requested: Option<&[String]>,
        timeout: Duration,
    ) -> Result<ReadingSet, TargetError> {
        let url = format!("{}/api/DeviceService/Devices({id})/Power", self.endpoint);
        let token = self
            .token()
            .await
            .ok_or_else(|| TargetError::Failure("no OME session".to_string()))?;

        trace!("requesting {url}");

        let response = self
            .client
            .get(&url)
            .header(AUTH_HEADER, token)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let response_time = Utc::now();
        let sample_time = Instant::now();

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.expire_session().await;
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TargetError::Failure(format!("HTTP {status}: {body}")));
        }

        let power: PowerResponse = response
            .json()
            .await
            .map_err(|e| TargetError::Failure(format!("invalid power response: {e}")))?;

        let mut readings = ReadingSet::new(id.as_str());
        readings.response_time = response_time;
        readings.sample_time = sample_time;

        if let Some(watts) = numeric(&power.power) {
            readings.insert(POWER, watts);
        }
        if let Some(energy) = numeric(&power.system_energy_consumption) {
            readings.insert(ENERGY_CONSUMPTION, energy);
        }
        if let Some(ts) = numeric(&power.system_energy_consumption_timestamp) {
            readings.insert(ENERGY_CONSUMPTION_TS, ts);
        }

        Ok(readings)
    }

    async fn list_targets(&self) -> Result<Vec<String>, TargetError> {
        let devices = self
            .load_devices()
            .await
            .map_err(|e| TargetError::Failure(format!("{e:#}")))?;

        let mut names: Vec<String> = devices.keys().cloned().collect();
        names.sort();
        *self.devices.write().await = devices;

        Ok(names)
    }

    async fn is_connected(&self) -> bool {
        self.token.read().await.is_some()
    }

    async fn reconnect(&self) -> Result<()> {
        warn!("OME: re-establishing session");
        *self.token.write().await = None;
        self.open_session().await
    }
}
