use std::sync::Arc;

use crate::transfer::TransferCoordinator;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    /// The process-wide coordinator; owns the single transaction slot
    pub coordinator: Arc<TransferCoordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<TransferCoordinator>) -> Self {
        Self { coordinator }
    }
}
