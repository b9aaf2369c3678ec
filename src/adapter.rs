//! Boundary between the polling engine and vendor integrations
//!
//! An adapter knows how to turn a human-facing target name into whatever
//! handle its provider uses, and how to fetch one set of readings for that
//! handle. Everything vendor-specific (sessions, REST paths, SDK objects,
//! command lines) lives behind this trait.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TargetError;

/// Provider-internal handle of a target, opaque to the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl ToString) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One numeric reading as returned by a target
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Unsigned(u64),
    Float(f64),
}

impl Reading {
    pub fn as_f64(&self) -> f64 {
        match self {
            Reading::Unsigned(u) => *u as f64,
            Reading::Float(f) => *f,
        }
    }

    /// Raw counter value; fractional floats are truncated
    ///
    /// `None` for negative or non-finite floats, which no counter register
    /// can hold.
    pub fn as_counter(&self) -> Option<u64> {
        match self {
            Reading::Unsigned(u) => Some(*u),
            Reading::Float(f) if f.is_finite() && *f >= 0.0 => Some(*f as u64),
            Reading::Float(_) => None,
        }
    }
}

impl From<u64> for Reading {
    fn from(value: u64) -> Self {
        Reading::Unsigned(value)
    }
}

impl From<f64> for Reading {
    fn from(value: f64) -> Self {
        Reading::Float(value)
    }
}

/// Readings of one target, possibly with nested sub-entities (e.g. VMs on a host)
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingSet {
    /// Target name (or sub-entity name for nested sets)
    pub name: String,

    /// Counter name to value
    pub readings: BTreeMap<String, Reading>,

    /// When the cycle issued the request
    pub request_time: DateTime<Utc>,

    /// When the response arrived
    pub response_time: DateTime<Utc>,

    /// Monotonic timestamp of the sample, used for rate computation
    pub sample_time: Instant,

    pub children: Vec<ReadingSet>,
}

impl ReadingSet {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            readings: BTreeMap::new(),
            request_time: now,
            response_time: now,
            sample_time: Instant::now(),
            children: Vec::new(),
        }
    }

    pub fn with_reading(mut self, counter: impl Into<String>, reading: impl Into<Reading>) -> Self {
        self.insert(counter, reading);
        self
    }

    pub fn with_child(mut self, child: ReadingSet) -> Self {
        self.children.push(child);
        self
    }

    pub fn insert(&mut self, counter: impl Into<String>, reading: impl Into<Reading>) {
        self.readings.insert(counter.into(), reading.into());
    }

    pub fn get(&self, counter: &str) -> Option<Reading> {
        self.readings.get(counter).copied()
    }
}

/// Capability set every vendor integration implements
///
/// Implementations are shared across concurrently running fetch tasks, so any
/// session state needs interior mutability.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// Map a target name to the provider's handle
    async fn resolve(&self, target_name: &str) -> Result<ProviderId, TargetError>;

    /// Perform one round-trip for a target
    ///
    /// `requested` optionally narrows the counters to retrieve. Must give up
    /// after `timeout` with [`TargetError::Timeout`].
    async fn fetch(
        &self,
        id: &ProviderId,
        requested: Option<&[String]>,
        timeout: Duration,
    ) -> Result<ReadingSet, TargetError>;

    /// Enumerate every target the provider knows about
    async fn list_targets(&self) -> Result<Vec<String>, TargetError> {
        Err(TargetError::Unsupported("target listing"))
    }

    /// Whether the underlying session is still usable
    async fn is_connected(&self) -> bool {
        true
    }

    /// Re-establish the underlying session
    async fn reconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
