use serde::Serialize;

use crate::metrics::LeaderboardEntry;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub ledger: String,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardResponse {
    pub entries: Vec<LeaderboardEntry>,
    pub total: usize,
}
