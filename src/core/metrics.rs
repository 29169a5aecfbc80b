// src/core/metrics.rs

//! Defines and registers Prometheus metrics for daemon monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifecycle. The per-module
//! counter structs remain the source of truth for the management API; the
//! gauges and counters here mirror the daemon-level ones for scraping.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    // --- Daemon-wide Gauges ---
    /// The number of MLAG port rows currently allocated.
    pub static ref MLAG_PORTS: Gauge =
        register_gauge!("mlagd_ports", "Number of allocated MLAG port rows.").unwrap();
    /// The number of entries in the master MAC table (master role only).
    pub static ref FDB_ENTRIES: Gauge =
        register_gauge!("mlagd_fdb_entries", "Number of entries in the master MAC table.").unwrap();
    /// The number of peers whose sessions are currently established.
    pub static ref CONNECTED_PEERS: Gauge =
        register_gauge!("mlagd_connected_peers", "Number of peers with an established session.").unwrap();
    /// Current master-election role (0 = standalone, 1 = slave, 2 = master).
    pub static ref ROLE: Gauge =
        register_gauge!("mlagd_role", "Master election role (0 standalone, 1 slave, 2 master).").unwrap();
    /// The number of flush state machines currently waiting on peer ACKs.
    pub static ref FLUSH_FSMS_BUSY: Gauge =
        register_gauge!("mlagd_flush_fsms_busy", "Flush state machines in the wait-peers state.").unwrap();

    // --- Daemon-wide Counters ---
    /// The total number of PDUs sent, labeled by channel.
    pub static ref PDUS_SENT_TOTAL: CounterVec =
        register_counter_vec!("mlagd_pdus_sent_total", "Total PDUs sent, labeled by channel.", &["channel"]).unwrap();
    /// The total number of PDUs received, labeled by channel.
    pub static ref PDUS_RECEIVED_TOTAL: CounterVec =
        register_counter_vec!("mlagd_pdus_received_total", "Total PDUs received, labeled by channel.", &["channel"]).unwrap();
    /// The total number of session teardowns followed by a reconnect attempt.
    pub static ref RECONNECTS_TOTAL: Counter =
        register_counter!("mlagd_reconnects_total", "Total reconnect attempts on peer sessions.").unwrap();
    /// The total number of flush requests dropped because a pool was empty.
    pub static ref FLUSH_POOL_DROPS_TOTAL: Counter =
        register_counter!("mlagd_flush_pool_drops_total", "Flush requests dropped on pool exhaustion.").unwrap();
    /// The total number of learn notifications denied for capacity reasons.
    pub static ref LEARN_DENIES_TOTAL: Counter =
        register_counter!("mlagd_learn_denies_total", "Learn notifications denied for capacity reasons.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text
/// format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
