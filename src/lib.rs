pub mod adapters;
pub mod agent;
pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod market;
pub mod metrics;

pub use config::AppConfig;
pub use engine::{SessionReport, SessionRequest, SessionRunner};
pub use error::{ArenaError, Result};
pub use ledger::{LedgerStore, MemoryLedger};
