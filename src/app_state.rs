use std::time::Instant;

use crate::services::{orchestrator::Orchestrator, transport::StatusTransport};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    /// Emitter used by the status event ingress
    pub transport: StatusTransport,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, transport: StatusTransport) -> Self {
        Self {
            orchestrator,
            transport,
            started_at: Instant::now(),
        }
    }
}
