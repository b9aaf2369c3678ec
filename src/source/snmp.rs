//! SNMP GET polling of a single device
//!
//! Each configured metric names an OID. A metric with a `range` expands into
//! one OID per index, substituting `${<label>}` in the OID and exposing the
//! index as a label value. Metrics in `rate` mode are emitted as per-second
//! rates; the first cycle after startup only records the baseline.

use std::slice;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, trace, warn};

use crate::adapter::TargetAdapter;
use crate::error::{PollError, PollResult};
use crate::orchestrator::{FleetQuery, QueryOptions};
use crate::rate::{CounterKind, CounterWidth, RateEngine, RateKey};
use crate::values::{Value, ValueSet};

use super::{Source, log_missing};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricMode {
    /// Emit the raw reading
    #[default]
    Value,
    /// Emit the per-second increase of a counter
    Rate,
}

/// Integer index range substituted into an OID template
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OidRange {
    pub from: u32,
    pub to: u32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnmpMetric {
    pub oid: String,
    pub name: String,
    #[serde(default)]
    pub mode: MetricMode,
    /// Counter register width in bits, only relevant in `rate` mode
    #[serde(default)]
    pub width: CounterWidth,
    #[serde(default)]
    pub range: Option<OidRange>,
}

impl SnmpMetric {
    pub fn new(oid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            name: name.into(),
            mode: MetricMode::Value,
            width: CounterWidth::Bits32,
            range: None,
        }
    }

    pub fn rate(mut self, width: CounterWidth) -> Self {
        self.mode = MetricMode::Rate;
        self.width = width;
        self
    }

    pub fn with_range(mut self, from: u32, to: u32, label: impl Into<String>) -> Self {
        self.range = Some(OidRange {
            from,
            to,
            label: label.into(),
        });
        self
    }

    /// Reject ranges that cannot expand to any OID
    pub fn validate(&self) -> PollResult<()> {
        match &self.range {
            Some(range) if range.from > range.to => Err(PollError::Config(format!(
                "metric {}: range {}..={} is empty",
                self.name, range.from, range.to
            ))),
            _ => Ok(()),
        }
    }

    fn kind(&self) -> CounterKind {
        match self.mode {
            MetricMode::Value => CounterKind::Gauge,
            MetricMode::Rate => CounterKind::Counter(self.width),
        }
    }
}

/// One concrete OID to read
#[derive(Debug, Clone, PartialEq)]
struct PolledOid {
    oid: String,
    name: String,
    kind: CounterKind,
    /// (label, value) contributed by a range expansion
    label: Option<(String, String)>,
}

/// Expand ranges; returns the label schema and the concrete OIDs
fn expand(metrics: &[SnmpMetric]) -> (Vec<String>, Vec<PolledOid>) {
    let mut labels: Vec<String> = Vec::new();
    let mut polled = Vec::new();

    for metric in metrics {
        let Some(range) = &metric.range else {
            polled.push(PolledOid {
                oid: metric.oid.clone(),
                name: metric.name.clone(),
                kind: metric.kind(),
                label: None,
            });
            continue;
        };

        if range.from > range.to {
            warn!(
                "metric {}: empty range {}..={}, nothing to poll",
                metric.name, range.from, range.to
            );
        }

        if !labels.contains(&range.label) {
            labels.push(range.label.clone());
        }

        let placeholder = format!("${{{}}}", range.label);
        for index in range.from..=range.to {
            polled.push(PolledOid {
                oid: metric.oid.replace(&placeholder, &index.to_string()),
                name: metric.name.clone(),
                kind: metric.kind(),
                label: Some((range.label.clone(), index.to_string())),
            });
        }
    }

    (labels, polled)
}

fn label_values(labels: &[String], oid: &PolledOid) -> Vec<String> {
    labels
        .iter()
        .map(|label| match &oid.label {
            Some((name, value)) if name == label => value.clone(),
            _ => String::new(),
        })
        .collect()
}

pub struct SnmpSource {
    name: String,
    host: String,
    labels: Vec<String>,
    oids: Vec<PolledOid>,
    query: FleetQuery,
    rates: RateEngine,
}

impl SnmpSource {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        metrics: &[SnmpMetric],
        options: QueryOptions,
        adapter: Arc<dyn TargetAdapter>,
    ) -> Self {
        let (labels, oids) = expand(metrics);
        let options = QueryOptions {
            requested_counters: Some(oids.iter().map(|o| o.oid.clone()).collect()),
            ..options.sized_for(1)
        };

        Self {
            name: name.into(),
            host: host.into(),
            labels,
            oids,
            query: FleetQuery::new(adapter, options),
            rates: RateEngine::new(),
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

#[async_trait]
impl Source for SnmpSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.name, host = %self.host))]
    async fn probe(&mut self) -> PollResult<ValueSet> {
        let mut data = ValueSet::new(self.labels.clone());

        let readings = match self.query.run(slice::from_ref(&self.host)).await.pop() {
            Some(Ok(readings)) => readings,
            Some(Err(e)) => {
                log_missing(&self.name, &self.host, &e);
                return Ok(data);
            }
            None => return Ok(data),
        };

        for oid in &self.oids {
            let Some(reading) = readings.get(&oid.oid) else {
                trace!("{}: no value for {}", self.host, oid.oid);
                continue;
            };

            let value = match oid.kind {
                CounterKind::Gauge => Some(reading.as_f64()),
                CounterKind::Counter(width) => match reading.as_counter() {
                    Some(raw) => self.rates.observe(
                        RateKey::new(&self.host, &oid.oid),
                        raw,
                        width,
                        readings.sample_time,
                    ),
                    None => {
                        debug!("{}: {} is not a counter value: {reading:?}", self.host, oid.oid);
                        None
                    }
                },
            };

            if let Some(value) = value {
                data.add(Value::new(&oid.name, value, label_values(&self.labels, oid)))?;
            }
        }

        debug!("{} values", data.len());
        Ok(data)
    }
}
