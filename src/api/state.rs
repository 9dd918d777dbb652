use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::api::auth::token_fingerprint;
use crate::engine::SessionRunner;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// Session runner; also owns the ledger handle
    pub runner: Arc<SessionRunner>,

    /// SHA-256 fingerprint of the trigger token; `None` disables the trigger
    pub trigger_fingerprint: Option<Arc<str>>,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(runner: Arc<SessionRunner>, trigger_token: Option<&str>) -> Self {
        Self {
            runner,
            trigger_fingerprint: trigger_token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| Arc::from(token_fingerprint(t))),
            start_time: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
