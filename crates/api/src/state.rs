use std::sync::Arc;

use kinetrack_core::backend::AnalysisBackend;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Opens a fresh decoder and detector for every video run.
    pub backend: Arc<dyn AnalysisBackend>,
}
