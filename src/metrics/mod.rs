//! Read-only performance metrics and leaderboard

pub mod leaderboard;
pub mod performance;

pub use leaderboard::{build_leaderboard, rank_standings, LeaderboardEntry, LeaderboardRow};
pub use performance::{compute, PerformanceMetrics};
