//! arena CLI
//!
//! Commands:
//! - `arena session` - Run one trading session over every active agent
//! - `arena leaderboard` - Show the ranked view with performance metrics
//! - `arena serve` - Start the trigger/leaderboard HTTP server
//! - `arena migrate` - Apply database migrations
//! - `arena seed` - Create the competition row and configured agents
//! - `arena snapshot` - Write today's daily snapshots

pub mod commands;
pub mod output;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Multi-agent stock-trading competition engine
#[derive(Parser, Debug)]
#[command(name = "arena")]
#[command(author, version, about = "Multi-agent stock-trading competition engine")]
pub struct Cli {
    /// Directory holding default.toml and per-environment overrides
    #[arg(long, global = true, env = "ARENA_CONFIG_DIR", default_value = "config")]
    pub config_dir: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one trading session
    Session {
        /// Only run this agent
        #[arg(long)]
        agent: Option<String>,
        /// Validate trades without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Ignore the trading window (competition dates still apply)
        #[arg(long)]
        force: bool,
        /// Re-run agents that already decided in this slot
        #[arg(long)]
        rerun: bool,
        /// Wall-clock budget, defaults to session.budget_secs
        #[arg(long)]
        budget_secs: Option<u64>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the leaderboard
    Leaderboard {
        #[arg(long)]
        json: bool,
    },

    /// Serve POST /api/session, GET /api/leaderboard and GET /health
    Serve {
        /// Overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Apply database migrations
    Migrate,

    /// Create the competition row and any missing agents
    Seed,

    /// Write one snapshot per agent
    Snapshot {
        /// Local date, defaults to today in the exchange offset
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Whether the command is a one-shot that only needs warnings on stderr
    pub fn is_one_shot(&self) -> bool {
        matches!(
            self.command,
            Commands::Leaderboard { .. } | Commands::Migrate | Commands::Seed | Commands::Snapshot { .. }
        )
    }
}
