//! SNMP adapter driving the net-snmp `snmpget` command line tool
//!
//! Output lines look like `iso.3.6.1.2.1.16.1.1.1.3.48 = Counter32: 123`.
//! Requested OIDs may be written as `iso.3...`, `1.3...` or `.1.3...`; they
//! are matched against the output in normalized numeric form, and readings
//! are keyed by the OID exactly as requested.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio::process::Command;
use tracing::{instrument, trace};

use crate::adapter::{ProviderId, Reading, ReadingSet, TargetAdapter};
use crate::error::TargetError;

static VARBIND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<oid>\S+) = (?P<kind>[A-Za-z][A-Za-z0-9\-]*): ?(?P<value>.*)$")
        .expect("varbind pattern is valid")
});

static TIMETICKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\((?P<ticks>\d+)\)").expect("timeticks pattern is valid"));

#[derive(Debug, Clone)]
pub struct SnmpCommand {
    binary: String,
    version: String,
    community: String,
}

impl SnmpCommand {
    pub fn new(community: impl Into<String>) -> Self {
        Self {
            binary: "snmpget".to_string(),
            version: "2c".to_string(),
            community: community.into(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn command(&self, host: &str, oids: &[String]) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg(format!("-v{}", self.version))
            .arg("-c")
            .arg(&self.community)
            .arg(host)
            .args(oids)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

/// Strip a leading dot and expand the `iso` prefix to `1`
pub fn normalize_oid(oid: &str) -> String {
    let oid = oid.trim().trim_start_matches('.');
    match oid.strip_prefix("iso.") {
        Some(rest) => format!("1.{rest}"),
        None => oid.to_string(),
    }
}

fn parse_value(kind: &str, raw: &str) -> Option<Reading> {
    let raw = raw.trim();
    match kind {
        "Counter32" | "Counter64" | "Gauge32" | "Unsigned32" => raw.parse().ok().map(Reading::Unsigned),
        "INTEGER" => raw
            .parse::<u64>()
            .map(Reading::Unsigned)
            .or_else(|_| raw.parse::<f64>().map(Reading::Float))
            .ok(),
        "Timeticks" => TIMETICKS
            .captures(raw)
            .and_then(|c| c["ticks"].parse().ok())
            .map(Reading::Unsigned),
        "STRING" | "Opaque" => raw.trim_matches('"').parse().ok().map(Reading::Float),
        _ => None,
    }
}

/// Parse `snmpget` output into (normalized OID, reading) pairs
///
/// Lines that are not numeric varbinds (errors, `No Such Object`, strings)
/// are skipped.
pub fn parse_output(output: &str) -> Vec<(String, Reading)> {
    output
        .lines()
        .filter_map(|line| {
            let Some(captures) = VARBIND.captures(line.trim_end()) else {
                trace!("skipping line: {line}");
                return None;
            };
            let reading = parse_value(&captures["kind"], &captures["value"])?;
            Some((normalize_oid(&captures["oid"]), reading))
        })
        .collect()
}

#[async_trait]
impl TargetAdapter for SnmpCommand {
    async fn resolve(&self, target_name: &str) -> Result<ProviderId, TargetError> {
        if target_name.trim().is_empty() {
            return Err(TargetError::NotFound(target_name.to_string()));
        }
        Ok(ProviderId::new(target_name))
    }

    #[instrument(skip(self, requested), fields(host = %id))]
    async fn fetch(
        &self,
        id: &ProviderId,
        requested: Option<&[String]>,
        timeout: Duration,
    ) -> Result<ReadingSet, TargetError> {
        let oids = match requested {
            Some(oids) if !oids.is_empty() => oids,
            _ => return Err(TargetError::Failure("no OIDs requested".to_string())),
        };

        let output = tokio::time::timeout(timeout, self.command(id.as_str(), oids).output())
            .await
            .map_err(|_| TargetError::Timeout(timeout))?
            .map_err(|e| TargetError::Failure(format!("failed to run {}: {e}", self.binary)))?;

        if !output.status.success() {
            return Err(TargetError::Failure(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!("snmpget output: {stdout}");

        let parsed: HashMap<String, Reading> = parse_output(&stdout).into_iter().collect();

        let mut readings = ReadingSet::new(id.as_str());
        readings.response_time = Utc::now();
        readings.sample_time = Instant::now();
        for oid in oids {
            if let Some(reading) = parsed.get(&normalize_oid(oid)) {
                readings.insert(oid.clone(), *reading);
            }
        }

        Ok(readings)
    }
}
