//! Command implementations behind [`super::Commands`]

use anyhow::{Context, Result};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use super::output::{print_items, print_session_report, OutputMode, SnapshotRow};
use super::Commands;
use crate::adapters::PostgresLedger;
use crate::api::{create_router, AppState};
use crate::bootstrap::{build_runner, connect_ledger, seed_ledger};
use crate::config::AppConfig;
use crate::engine::{take_snapshots, SessionRequest, TradingCalendar};
use crate::metrics::{build_leaderboard, LeaderboardRow};

pub async fn run(command: Commands, cfg: AppConfig) -> Result<()> {
    let cfg = Arc::new(cfg);
    match command {
        Commands::Session {
            agent,
            dry_run,
            force,
            rerun,
            budget_secs,
            json,
        } => {
            let runner = build_runner(Arc::clone(&cfg)).await?;
            let request = SessionRequest {
                agent,
                dry_run,
                force,
                rerun,
                budget_secs,
            };
            let report = runner.run(request).await?;
            print_session_report(&report, OutputMode::from_json_flag(json))?;
        }
        Commands::Leaderboard { json } => {
            let ledger = connect_ledger(&cfg).await?;
            seed_ledger(ledger.as_ref(), &cfg, false).await?;
            let entries = build_leaderboard(ledger.as_ref(), cfg.metrics.risk_free_rate).await?;
            match OutputMode::from_json_flag(json) {
                OutputMode::Json => super::output::print_item(&entries)?,
                OutputMode::Table => {
                    let rows: Vec<LeaderboardRow> = entries.iter().map(LeaderboardRow::from).collect();
                    print_items(&rows, OutputMode::Table)?;
                }
            }
        }
        Commands::Serve { bind } => serve(cfg, bind).await?,
        Commands::Migrate => {
            if cfg.database.is_memory() {
                println!("in-memory ledger: nothing to migrate");
                return Ok(());
            }
            let ledger = PostgresLedger::new(&cfg.database.url, cfg.database.max_connections).await?;
            ledger.migrate().await?;
            println!("migrations applied");
        }
        Commands::Seed => {
            let ledger = connect_ledger(&cfg).await?;
            let created = seed_ledger(ledger.as_ref(), &cfg, true).await?;
            println!(
                "competition '{}' stored; {} new agent(s) of {} configured",
                cfg.competition.name,
                created,
                cfg.agents.len()
            );
        }
        Commands::Snapshot { date, json } => {
            let ledger = connect_ledger(&cfg).await?;
            seed_ledger(ledger.as_ref(), &cfg, false).await?;
            let date = match date {
                Some(d) => d,
                None => TradingCalendar::from_config(&cfg.trading_window)?.local_date(Utc::now()),
            };
            let snapshots = take_snapshots(ledger.as_ref(), date).await?;
            let rows: Vec<SnapshotRow> = snapshots.iter().map(SnapshotRow::from).collect();
            print_items(&rows, OutputMode::from_json_flag(json))?;
        }
    }
    Ok(())
}

async fn serve(cfg: Arc<AppConfig>, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address '{bind}'"))?;

    let token = cfg.server.trigger_token();
    if token.is_none() {
        tracing::warn!(
            env = %cfg.server.trigger_token_env,
            "no trigger token configured; POST /api/session will reject every call"
        );
    }

    let runner = Arc::new(build_runner(Arc::clone(&cfg)).await?);
    let app = create_router(AppState::new(runner, token.as_deref()));

    info!("API server listening on http://{}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;
    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;
    use tracing::error;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
