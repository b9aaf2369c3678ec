//! Power readings of Dell servers through OpenManage Enterprise
//!
//! Emits, per host (label `host`):
//!
//! - `power`: current draw in watts
//! - `request_ts`: unix timestamp at which the cycle issued its requests
//! - `system_energy_consumption`: cumulative energy, when reported

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, trace};

use crate::adapter::{ReadingSet, TargetAdapter};
use crate::error::PollResult;
use crate::orchestrator::{FleetQuery, QueryOptions};
use crate::values::{Value, ValueSet};

use super::{ScrapePolicy, Source, TargetPlan, ensure_connected, log_missing, unix_seconds};

/// Counter names produced by the OpenManage adapter
pub const POWER: &str = "power";
pub const ENERGY_CONSUMPTION: &str = "system_energy_consumption";

pub struct DellPowerSource {
    name: String,
    plan: TargetPlan,
    query: FleetQuery,
}

impl DellPowerSource {
    pub async fn new(
        name: impl Into<String>,
        policy: ScrapePolicy,
        options: QueryOptions,
        adapter: Arc<dyn TargetAdapter>,
    ) -> Self {
        let name = name.into();
        let plan = TargetPlan::from_policy(policy, &name).await;
        let query = FleetQuery::new(adapter, plan.size_options(options));

        Self { name, plan, query }
    }

    fn add_host(&self, data: &mut ValueSet, host: &ReadingSet) -> PollResult<()> {
        let labels = [host.name.as_str()];

        match host.get(POWER) {
            Some(power) => data.add(Value::new(POWER, power.as_f64(), labels))?,
            None => trace!("{}: {} reported no power reading", self.name, host.name),
        }

        data.add(Value::new(
            "request_ts",
            unix_seconds(host.request_time),
            labels,
        ))?;

        if let Some(energy) = host.get(ENERGY_CONSUMPTION) {
            data.add(Value::new(ENERGY_CONSUMPTION, energy.as_f64(), labels))?;
        }

        Ok(())
    }
}

#[async_trait]
impl Source for DellPowerSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.name))]
    async fn probe(&mut self) -> PollResult<ValueSet> {
        ensure_connected(self.query.adapter(), &self.name).await;

        let targets = self
            .plan
            .targets(self.query.adapter().as_ref(), &self.name)
            .await;
        let results = self.query.run(&targets).await;

        let mut data = ValueSet::new(["host"]);
        for (target, result) in targets.iter().zip(&results) {
            match result {
                Ok(host) => self.add_host(&mut data, host)?,
                Err(e) => log_missing(&self.name, target, e),
            }
        }

        debug!("{} values from {} targets", data.len(), targets.len());
        Ok(data)
    }
}
