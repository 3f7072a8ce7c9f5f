use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::telemetry::SharedStateBus;
use crate::webrtc::SessionManager;

/// State shared by the HTTP handlers
pub struct AppState {
    /// Active headset sessions
    pub sessions: Arc<SessionManager>,
    /// Latest controller telemetry
    pub bus: Arc<SharedStateBus>,
    /// Cancelled when the server begins shutting down
    pub shutdown: CancellationToken,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        sessions: Arc<SessionManager>,
        bus: Arc<SharedStateBus>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            bus,
            shutdown,
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
