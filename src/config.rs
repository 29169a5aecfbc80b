// src/config.rs

//! Manages daemon configuration: loading, per-section defaults, and validation.

use crate::core::types::{MAX_PEERS, MAX_PORTS};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// A statically addressed MLAG peer. The slot index doubles as the peer id
/// used in every PDU, so the list order must match on all peers.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PeerConfig {
    pub id: u8,
    /// Address of the peer on the IPL management network (no port; the
    /// per-channel TCP ports come from the channel sections).
    pub addr: String,
}

/// Settings shared by both TCP channels (control and mac-sync).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CommChannelConfig {
    pub port: u16,
    /// Delay before a slave retries a failed or torn-down connection.
    #[serde(with = "humantime_serde", default = "default_reconnect_interval")]
    pub reconnect_interval: Duration,
    #[serde(default = "default_sndbuf")]
    pub sndbuf: usize,
    #[serde(default = "default_rcvbuf")]
    pub rcvbuf: usize,
    /// Upper bound for a single framed PDU. The mac-sync channel carries the
    /// full-FDB export in one frame, so its default is jumbo-sized.
    #[serde(default = "default_max_pdu_len")]
    pub max_pdu_len: usize,
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_sndbuf() -> usize {
    10_000
}
fn default_rcvbuf() -> usize {
    10_000
}
fn default_max_pdu_len() -> usize {
    64 * 1024
}

fn default_control_channel() -> CommChannelConfig {
    CommChannelConfig {
        port: default_control_port(),
        reconnect_interval: default_reconnect_interval(),
        sndbuf: default_sndbuf(),
        rcvbuf: default_rcvbuf(),
        max_pdu_len: default_max_pdu_len(),
    }
}

fn default_mac_sync_channel() -> CommChannelConfig {
    CommChannelConfig {
        port: default_mac_sync_port(),
        reconnect_interval: default_reconnect_interval(),
        sndbuf: default_jumbo_buf(),
        rcvbuf: default_jumbo_buf(),
        max_pdu_len: default_jumbo_pdu_len(),
    }
}

fn default_control_port() -> u16 {
    51235
}
fn default_mac_sync_port() -> u16 {
    51236
}
fn default_jumbo_buf() -> usize {
    100_000
}
fn default_jumbo_pdu_len() -> usize {
    1024 * 1024
}

/// FDB synchronization limits.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FdbConfig {
    /// Capacity of the master MAC table. Exhaustion surfaces as deny
    /// decisions on incoming learn notifications.
    #[serde(default = "default_max_fdb_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_router_macs")]
    pub max_router_macs: usize,
    /// A MAC that moves between ports faster than this is treated as a
    /// bounce and the migration is dropped. Wall-second granularity.
    #[serde(with = "humantime_serde", default = "default_migration_debounce")]
    pub migration_debounce: Duration,
    /// Largest LocalLearn/LocalAge batch staged before a forced send.
    #[serde(default = "default_notify_batch_max")]
    pub notify_batch_max: usize,
}

fn default_max_fdb_entries() -> usize {
    16_384
}
fn default_max_router_macs() -> usize {
    64
}
fn default_migration_debounce() -> Duration {
    Duration::from_secs(1)
}
fn default_notify_batch_max() -> usize {
    256
}

impl Default for FdbConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_fdb_entries(),
            max_router_macs: default_max_router_macs(),
            migration_debounce: default_migration_debounce(),
            notify_batch_max: default_notify_batch_max(),
        }
    }
}

/// Flush coordinator pool sizes and the per-flush ACK timeout.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FlushConfig {
    #[serde(with = "humantime_serde", default = "default_flush_ack_timeout")]
    pub ack_timeout: Duration,
    /// Pool for (port, vid) flush keys.
    #[serde(default = "default_port_vid_pool")]
    pub port_vid_pool: usize,
    /// Pool for global / per-vid / per-port flush keys. The default covers
    /// the worst case of every vid and every port flushed by every origin
    /// class, plus the global key.
    #[serde(default = "default_system_pool")]
    pub system_pool: usize,
}

fn default_flush_ack_timeout() -> Duration {
    Duration::from_millis(1500)
}
fn default_port_vid_pool() -> usize {
    10_000
}
fn default_system_pool() -> usize {
    8 * (4094 + 128) + 1
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            ack_timeout: default_flush_ack_timeout(),
            port_vid_pool: default_port_vid_pool(),
            system_pool: default_system_pool(),
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8879
}

/// The validated daemon configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// The local peer slot (0-based). Also the bit this node occupies in
    /// every peer bitmap on the wire.
    #[serde(default)]
    pub peer_id: u8,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port id of the inter-peer link. May also be set at runtime through
    /// the management surface.
    #[serde(default)]
    pub ipl_port: Option<u64>,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default = "default_control_channel")]
    pub control: CommChannelConfig,
    #[serde(default = "default_mac_sync_channel")]
    pub mac_sync: CommChannelConfig,
    #[serde(default)]
    pub fdb: FdbConfig,
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_id: 0,
            log_level: default_log_level(),
            ipl_port: None,
            peers: Vec::new(),
            control: default_control_channel(),
            mac_sync: default_mac_sync_channel(),
            fdb: FdbConfig::default(),
            flush: FlushConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates a configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("could not read config file '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("could not parse config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation that cannot be expressed through serde defaults.
    pub fn validate(&self) -> Result<()> {
        if self.peer_id as usize >= MAX_PEERS {
            return Err(anyhow!(
                "peer_id {} out of range (MAX_PEERS = {MAX_PEERS})",
                self.peer_id
            ));
        }
        if self.peers.len() > MAX_PEERS {
            return Err(anyhow!(
                "{} peers configured, at most {MAX_PEERS} supported",
                self.peers.len()
            ));
        }
        for peer in &self.peers {
            if peer.id as usize >= MAX_PEERS {
                return Err(anyhow!("peer id {} out of range", peer.id));
            }
        }
        if self.control.port == self.mac_sync.port {
            return Err(anyhow!(
                "control and mac-sync channels must use distinct TCP ports"
            ));
        }
        if self.fdb.max_entries == 0 || self.fdb.max_entries > 1 << 20 {
            return Err(anyhow!(
                "fdb.max_entries {} outside the supported range",
                self.fdb.max_entries
            ));
        }
        if self.fdb.notify_batch_max == 0 {
            return Err(anyhow!("fdb.notify_batch_max must be at least 1"));
        }
        Ok(())
    }

    /// Address of a configured peer, if present.
    pub fn peer_addr(&self, id: u8) -> Option<&str> {
        self.peers
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.addr.as_str())
    }

    /// Upper bound on MLAG port rows; fixed for the life of the process.
    pub fn max_ports(&self) -> usize {
        MAX_PORTS
    }
}
