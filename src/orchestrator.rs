//! Fan one collection cycle out across many targets
//!
//! ## Cycle
//!
//! ```text
//! Idle → Dispatching → Collecting → Done
//!          │              │
//!          │              └─ await each task in input order, bounded by the batch deadline
//!          └─ spawn one task per target, each waits for a worker permit
//! ```
//!
//! Every target yields exactly one entry in the output, in input order. A
//! target that fails, exceeds its call timeout, or is still running when the
//! batch deadline passes becomes an `Err` entry; its siblings are unaffected.
//! Nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, instrument, trace};

use crate::adapter::{ReadingSet, TargetAdapter};
use crate::error::TargetError;

/// Outcome of querying one target
pub type TargetResult = Result<ReadingSet, TargetError>;

pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Tunables of a fleet query
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Upper bound of concurrently running fetches
    pub workers: usize,

    /// Deadline for one resolve + fetch round-trip
    pub call_timeout: Duration,

    /// Deadline for the whole cycle
    pub batch_timeout: Duration,

    /// Counter hint passed to every fetch
    pub requested_counters: Option<Vec<String>>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            requested_counters: None,
        }
    }
}

impl QueryOptions {
    /// Clamp the worker count to the number of targets (at least one worker)
    pub fn sized_for(mut self, target_count: usize) -> Self {
        self.workers = effective_workers(self.workers, target_count);
        self
    }
}

/// Never more workers than targets, never zero
pub fn effective_workers(configured: usize, target_count: usize) -> usize {
    configured.min(target_count).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Dispatching,
    Collecting,
    Done,
}

/// Concurrent multi-target query bound to one adapter
///
/// The worker pool is created once and reused by every cycle.
pub struct FleetQuery {
    adapter: Arc<dyn TargetAdapter>,
    options: QueryOptions,
    pool: Arc<Semaphore>,
    phase: CyclePhase,
}

impl FleetQuery {
    pub fn new(adapter: Arc<dyn TargetAdapter>, options: QueryOptions) -> Self {
        let workers = options.workers.max(1);
        Self {
            adapter,
            options: QueryOptions { workers, ..options },
            pool: Arc::new(Semaphore::new(workers)),
            phase: CyclePhase::Idle,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn TargetAdapter> {
        &self.adapter
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Query every target once and return one result per target, in input order
    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn run(&mut self, targets: &[String]) -> Vec<TargetResult> {
        self.phase = CyclePhase::Dispatching;

        let deadline = Instant::now() + self.options.batch_timeout;
        let request_time = Utc::now();
        let requested: Option<Arc<[String]>> =
            self.options.requested_counters.as_deref().map(Arc::from);

        debug!(
            "dispatching {} targets on {} workers",
            targets.len(),
            effective_workers(self.options.workers, targets.len())
        );

        let handles: Vec<JoinHandle<TargetResult>> = targets
            .iter()
            .map(|target| {
                let adapter = self.adapter.clone();
                let pool = self.pool.clone();
                let target = target.clone();
                let requested = requested.clone();
                let call_timeout = self.options.call_timeout;

                tokio::spawn(async move {
                    // permit is held for the duration of the call only
                    let _permit = pool
                        .acquire_owned()
                        .await
                        .map_err(|_| TargetError::Failure("worker pool closed".to_string()))?;

                    let mut readings = query_target(
                        adapter.as_ref(),
                        &target,
                        requested.as_deref(),
                        call_timeout,
                    )
                    .await?;

                    readings.name = target;
                    readings.request_time = request_time;
                    Ok::<_, TargetError>(readings)
                })
            })
            .collect();

        self.phase = CyclePhase::Collecting;

        let mut results = Vec::with_capacity(handles.len());
        for (target, mut handle) in targets.iter().zip(handles) {
            let result = match timeout_at(deadline, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => Err(TargetError::Failure(format!(
                    "query task aborted: {join_error}"
                ))),
                Err(_) => {
                    handle.abort();
                    Err(TargetError::Timeout(self.options.batch_timeout))
                }
            };

            match &result {
                Ok(readings) => trace!("{target}: {} readings", readings.readings.len()),
                Err(e) => debug!("{target}: {e}"),
            }

            results.push(result);
        }

        self.phase = CyclePhase::Done;
        results
    }
}

async fn query_target(
    adapter: &dyn TargetAdapter,
    target: &str,
    requested: Option<&[String]>,
    call_timeout: Duration,
) -> TargetResult {
    let call = async {
        let id = adapter.resolve(target).await?;
        trace!("{target}: resolved to {id}");
        adapter.fetch(&id, requested, call_timeout).await
    };

    timeout(call_timeout, call)
        .await
        .unwrap_or(Err(TargetError::Timeout(call_timeout)))
}
