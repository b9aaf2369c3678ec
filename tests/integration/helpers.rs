//! Scripted adapter for driving the engine without real devices

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fleet_poller::adapter::{ProviderId, ReadingSet, TargetAdapter};
use fleet_poller::error::TargetError;

/// Behaviour of one target
#[derive(Debug, Clone)]
pub struct Script {
    pub latency: Duration,
    pub outcome: Result<ReadingSet, TargetError>,
}

impl Script {
    pub fn ok(readings: ReadingSet) -> Self {
        Self {
            latency: Duration::ZERO,
            outcome: Ok(readings),
        }
    }

    pub fn fail(error: TargetError) -> Self {
        Self {
            latency: Duration::ZERO,
            outcome: Err(error),
        }
    }

    pub fn after(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// Adapter answering from a per-target script and tracking concurrency
#[derive(Default)]
pub struct ScriptedAdapter {
    scripts: Mutex<HashMap<String, Script>>,
    listing: Mutex<Option<Vec<String>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fetches: AtomicUsize,
    connected: AtomicBool,
    reconnects: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn script(&self, target: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(target.to_string(), script);
    }

    pub fn list(&self, targets: &[&str]) {
        *self.listing.lock().unwrap() = Some(targets.iter().map(|t| t.to_string()).collect());
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight gauge even when the fetch future is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TargetAdapter for ScriptedAdapter {
    async fn resolve(&self, target_name: &str) -> Result<ProviderId, TargetError> {
        if self.scripts.lock().unwrap().contains_key(target_name) {
            Ok(ProviderId::new(target_name))
        } else {
            Err(TargetError::NotFound(target_name.to_string()))
        }
    }

    async fn fetch(
        &self,
        id: &ProviderId,
        _requested: Option<&[String]>,
        _timeout: Duration,
    ) -> Result<ReadingSet, TargetError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| TargetError::NotFound(id.to_string()))?;

        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(script.latency).await;

        script.outcome
    }

    async fn list_targets(&self) -> Result<Vec<String>, TargetError> {
        self.listing
            .lock()
            .unwrap()
            .clone()
            .ok_or(TargetError::Unsupported("target listing"))
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> anyhow::Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn names(targets: &[&str]) -> Vec<String> {
    targets.iter().map(|t| t.to_string()).collect()
}
