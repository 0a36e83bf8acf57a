//! Application state for the API server.

use std::sync::Arc;

use subforge_core::{ConfigService, RefreshQueue, DEFAULT_QUEUE_CAPACITY};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Core entry points.
    pub service: Arc<ConfigService>,
    /// Bounded queue feeding the refresh worker.
    pub refresh: RefreshQueue,
}

impl AppState {
    /// Creates the state and starts the refresh worker on the current runtime.
    pub fn new(service: Arc<ConfigService>) -> Self {
        Self::with_queue_capacity(service, DEFAULT_QUEUE_CAPACITY)
    }

    /// Like [`AppState::new`] with an explicit queue size.
    pub fn with_queue_capacity(service: Arc<ConfigService>, capacity: usize) -> Self {
        let (refresh, _worker) = RefreshQueue::start(Arc::clone(&service), capacity);
        Self { service, refresh }
    }
}
