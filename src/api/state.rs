use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::adapters::AccountDirectory;
use crate::services::Dispatcher;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub directory: Arc<dyn AccountDirectory>,
    /// Application start time, reported by the health probe
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, directory: Arc<dyn AccountDirectory>) -> Self {
        Self {
            dispatcher,
            directory,
            started_at: Utc::now(),
        }
    }
}
