// src/server/context.rs

use crate::core::orchestrator::Orchestrator;
use crate::core::state::MlagState;
use std::sync::Arc;

/// Everything the startup phases hand from one to the next.
pub struct ServerContext {
    pub state: Arc<MlagState>,
    pub orchestrator: Orchestrator,
    pub metrics_enabled: bool,
}
