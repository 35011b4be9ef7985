use crate::config::Config;
use crate::pipeline::JobSupervisor;
use crate::status::StatusTracker;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub tracker: StatusTracker,
    /// Owns the background run of every accepted upload.
    pub supervisor: JobSupervisor,
}
