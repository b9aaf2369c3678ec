//! Adapters shipped with the poller
//!
//! - [`openmanage`]: Dell OpenManage Enterprise REST API
//! - [`snmp`]: net-snmp `snmpget` command line
//!
//! vSphere has no adapter here; embedders bring their own SDK binding and
//! hand it to [`VSphereSource`](crate::source::vsphere::VSphereSource).

pub mod openmanage;
pub mod snmp;
