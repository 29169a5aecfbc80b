// src/core/state.rs

//! The central `MlagState` struct, holding all shared daemon-wide state.
//!
//! Wrapped in an `Arc` and handed to every service and background task.
//! Cross-service mutable state is limited to the port database and the
//! liveness table it contains, both protected by their own locks.

use crate::config::Config;
use crate::core::events::{EventBus, EventQueues, SystemEvent};
use crate::core::metrics;
use crate::core::port::PortDb;
use crate::core::types::{PeerId, Role};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use tracing_subscriber::{Registry, filter::EnvFilter, reload};

/// Capacity of the upward notification channel consumed by the management
/// surface and the tests.
const NOTIFICATION_CAPACITY: usize = 256;

pub struct MlagState {
    pub config: RwLock<Config>,
    role: RwLock<Role>,
    pub port_db: Arc<PortDb>,
    /// Posting half of the port-manager service's priority bus.
    pub manager_bus: EventBus,
    /// Posting half of the mac-sync service's priority bus.
    pub mac_sync_bus: EventBus,
    /// Upward completion/notification events (PortDeleted, PeerSyncDone,
    /// StopDone) for the management surface.
    notifications: broadcast::Sender<SystemEvent>,
    /// Broadcast used to stop auxiliary tasks (metrics exporter).
    pub shutdown_tx: broadcast::Sender<()>,
    /// Handle to the logging filter for runtime verbosity changes.
    log_reload_handle: RwLock<Option<Arc<reload::Handle<EnvFilter, Registry>>>>,
}

/// The queues handed to the two dispatchers at spawn time.
pub struct MlagInit {
    pub state: Arc<MlagState>,
    pub manager_queues: EventQueues,
    pub mac_sync_queues: EventQueues,
}

impl MlagState {
    pub fn initialize(config: Config) -> MlagInit {
        let (manager_bus, manager_queues) = EventBus::new();
        let (mac_sync_bus, mac_sync_queues) = EventBus::new();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(4);
        let max_ports = config.max_ports();

        let state = Arc::new(MlagState {
            config: RwLock::new(config),
            role: RwLock::new(Role::Standalone),
            port_db: Arc::new(PortDb::new(max_ports)),
            manager_bus,
            mac_sync_bus,
            notifications,
            shutdown_tx,
            log_reload_handle: RwLock::new(None),
        });

        MlagInit {
            state,
            manager_queues,
            mac_sync_queues,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.config.read().peer_id
    }

    pub fn role(&self) -> Role {
        *self.role.read()
    }

    pub fn set_role(&self, role: Role) {
        *self.role.write() = role;
        metrics::ROLE.set(match role {
            Role::Standalone => 0.0,
            Role::Slave => 1.0,
            Role::Master => 2.0,
        });
    }

    /// Publishes an upward notification. Nobody listening is fine.
    pub fn notify(&self, event: SystemEvent) {
        let _ = self.notifications.send(event);
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<SystemEvent> {
        self.notifications.subscribe()
    }

    pub fn set_log_reload_handle(&self, handle: Arc<reload::Handle<EnvFilter, Registry>>) {
        *self.log_reload_handle.write() = Some(handle);
    }

    /// Applies a new verbosity filter at runtime.
    pub fn set_log_level(&self, level: &str) {
        let Some(handle) = self.log_reload_handle.read().clone() else {
            return;
        };
        match EnvFilter::try_new(level) {
            Ok(filter) => {
                if let Err(e) = handle.reload(filter) {
                    warn!("failed to apply log level change: {e}");
                } else {
                    self.config.write().log_level = level.to_string();
                }
            }
            Err(e) => warn!("invalid log level '{level}': {e}"),
        }
    }
}
