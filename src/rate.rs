//! Counter-to-rate conversion across polling cycles
//!
//! Hardware counters only ever grow, but they are stored in fixed-width
//! registers and wrap back to zero. [`RateEngine`] remembers the previous raw
//! sample per counter and turns each new one into a per-second rate.
//!
//! ## Limitation
//!
//! A single wrap between two samples is detected. If a counter wraps more
//! than once within one polling interval the extra wraps are invisible and
//! the rate comes out too low. Polling intervals are expected to be short
//! relative to the wrap period.

use std::collections::HashMap;
use std::time::Instant;

use serde::Deserialize;
use tracing::trace;

/// Register width of a monotonic counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum CounterWidth {
    #[default]
    Bits32,
    Bits64,
}

impl CounterWidth {
    pub fn bits(self) -> u32 {
        match self {
            CounterWidth::Bits32 => 32,
            CounterWidth::Bits64 => 64,
        }
    }

    /// Number of distinct values the register can hold (2^bits)
    fn modulus(self) -> u128 {
        1u128 << self.bits()
    }
}

impl TryFrom<u8> for CounterWidth {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            32 => Ok(CounterWidth::Bits32),
            64 => Ok(CounterWidth::Bits64),
            other => Err(format!("unsupported counter width: {other} (expected 32 or 64)")),
        }
    }
}

/// How a reading behaves between cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    /// Plain value, never wraps
    Gauge,
    /// Monotonic counter wrapping at the given width
    Counter(CounterWidth),
}

/// Increase of a counter between two samples, allowing for one wraparound
pub fn get_delta(previous: u64, current: u64, width: CounterWidth) -> u64 {
    if current >= previous {
        return current - previous;
    }

    let wrapped = width.modulus().saturating_sub(previous as u128) + current as u128;
    wrapped as u64
}

/// Identity of one counter on one target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub target: String,
    pub counter: String,
}

impl RateKey {
    pub fn new(target: impl Into<String>, counter: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            counter: counter.into(),
        }
    }
}

/// Last sample seen for a counter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateState {
    pub last_raw_value: u64,
    pub last_sample_time: Instant,
}

/// Per-source memory of previous counter samples
///
/// Each source owns its own engine; nothing is shared between sources.
#[derive(Debug, Default)]
pub struct RateEngine {
    states: HashMap<RateKey, RateState>,
}

impl RateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw sample and get the rate since the previous one
    ///
    /// Returns `None` for the first sample of a key (it only sets the
    /// baseline) and when `sample_time` is not later than the stored sample,
    /// in which case the stored state is left untouched.
    pub fn observe(
        &mut self,
        key: RateKey,
        raw_value: u64,
        width: CounterWidth,
        sample_time: Instant,
    ) -> Option<f64> {
        let Some(state) = self.states.get_mut(&key) else {
            trace!(host = %key.target, counter = %key.counter, "baseline sample {raw_value}");
            self.states.insert(
                key,
                RateState {
                    last_raw_value: raw_value,
                    last_sample_time: sample_time,
                },
            );
            return None;
        };

        let elapsed = sample_time
            .checked_duration_since(state.last_sample_time)
            .filter(|elapsed| !elapsed.is_zero())?;

        let delta = get_delta(state.last_raw_value, raw_value, width);
        let rate = delta as f64 / elapsed.as_secs_f64();

        state.last_raw_value = raw_value;
        state.last_sample_time = sample_time;

        Some(rate)
    }

    pub fn state(&self, key: &RateKey) -> Option<&RateState> {
        self.states.get(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
