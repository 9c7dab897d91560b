use std::collections::HashMap;
use std::sync::Arc;

use dropgate_core::transfer::CancelHandle;
use tokio::sync::RwLock;

/// Shared application state managed by Tauri.
///
/// The transfer registry is behind an `Arc` so spawned session tasks can
/// deregister themselves when they finish, and behind `RwLock` for safe
/// concurrent access from multiple Tauri command invocations.
pub struct AppState {
    /// Active transfers by registry id; the handle cancels the session.
    pub transfers: Arc<RwLock<HashMap<String, CancelHandle>>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            transfers: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}
