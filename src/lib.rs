//! Pluggable metrics polling engine
//!
//! Sources poll fleets of targets (Dell servers through OpenManage, vSphere
//! hosts, SNMP devices) through a [`TargetAdapter`](adapter::TargetAdapter),
//! fanning out per-target queries over a bounded worker pool and flattening
//! the readings into a labeled [`ValueSet`](values::ValueSet).

pub mod adapter;
pub mod adapters;
pub mod config;
pub mod directory;
pub mod error;
pub mod orchestrator;
pub mod rate;
pub mod source;
pub mod values;
