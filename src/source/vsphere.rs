//! Performance counters of vSphere hosts and the VMs running on them
//!
//! Labels are `type`, `host`, `vm`: host-level readings carry
//! `["host", <host>, ""]`, VM readings `["vm", <host>, <vm>]`.
//!
//! The SDK adapter is supplied by the embedding application; this source only
//! needs it to implement [`TargetAdapter`], nesting one child [`ReadingSet`]
//! per VM under each host.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::adapter::{ReadingSet, TargetAdapter};
use crate::error::PollResult;
use crate::orchestrator::{FleetQuery, QueryOptions};
use crate::values::{Value, ValueSet};

use super::{ScrapePolicy, Source, TargetPlan, ensure_connected, log_missing, unix_seconds};

pub struct VSphereSource {
    name: String,
    plan: TargetPlan,
    query: FleetQuery,
}

impl VSphereSource {
    /// `options.requested_counters` is forwarded to every fetch; `None` lets
    /// the adapter pick its default counter set.
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
}

fn add_entity(
    data: &mut ValueSet,
    entity: &ReadingSet,
    request_ts: f64,
    label_values: [&str; 3],
) -> PollResult<()> {
    data.add(Value::new("request_ts", request_ts, label_values))?;

    for (metric, reading) in &entity.readings {
        data.add(Value::new(metric, reading.as_f64(), label_values))?;
    }

    Ok(())
}

#[async_trait]
impl Source for VSphereSource {
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

        let mut data = ValueSet::new(["type", "host", "vm"]);
        for (target, result) in targets.iter().zip(&results) {
            let host = match result {
                Ok(host) => host,
                Err(e) => {
                    log_missing(&self.name, target, e);
                    continue;
                }
            };

            let request_ts = unix_seconds(host.request_time);
            add_entity(&mut data, host, request_ts, ["host", host.name.as_str(), ""])?;

            for vm in &host.children {
                add_entity(&mut data, vm, request_ts, ["vm", host.name.as_str(), vm.name.as_str()])?;
            }
        }

        debug!("{} values from {} hosts", data.len(), targets.len());
        Ok(data)
    }
}
