//! Inventory module: periodically observes OS state through a
//! [`Collector`] and feeds each observation into the delta engine, so
//! only actual changes leave the host. Deltas are published as
//! `dbsync_<table>` documents through the agent's push callback.

mod collector;
mod module;
mod tables;

pub use collector::{Collector, RowSink};
pub use module::Inventory;
pub use tables::{
    schema_ddl, HOTFIXES_TABLE, HWINFO_TABLE, NETWORK_ADDRESS_TABLE, NETWORK_IFACE_TABLE,
    NETWORK_PROTOCOL_TABLE, OSINFO_TABLE, PACKAGES_TABLE, PORTS_TABLE, PROCESSES_TABLE,
};
