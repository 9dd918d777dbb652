//! Wiring from configuration to a ready [`SessionRunner`]

use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::{HttpQuoteResolver, PostgresLedger};
use crate::agent::ProviderRegistry;
use crate::config::AppConfig;
use crate::domain::Agent;
use crate::engine::SessionRunner;
use crate::error::Result;
use crate::ledger::{LedgerStore, MemoryLedger};
use crate::market::{QuoteResolver, StaticQuoteResolver};

/// Open the configured ledger; Postgres ledgers are migrated first
pub async fn connect_ledger(cfg: &AppConfig) -> Result<Arc<dyn LedgerStore>> {
    if cfg.database.is_memory() {
        info!("using in-memory ledger");
        return Ok(Arc::new(MemoryLedger::new()));
    }

    let ledger = PostgresLedger::new(&cfg.database.url, cfg.database.max_connections).await?;
    ledger.migrate().await?;
    Ok(Arc::new(ledger))
}

/// Make sure the competition row and every configured agent exist.
///
/// Existing agents keep their ledger state. The competition row is only
/// replaced when `overwrite_competition` is set.
pub async fn seed_ledger(
    ledger: &dyn LedgerStore,
    cfg: &AppConfig,
    overwrite_competition: bool,
) -> Result<usize> {
    if overwrite_competition || ledger.get_competition().await?.is_none() {
        ledger
            .upsert_competition(&cfg.competition.to_competition())
            .await?;
    }

    let mut created = 0;
    for spec in &cfg.agents {
        let agent = Agent::new(
            &spec.id,
            &spec.name,
            spec.provider,
            &spec.model,
            spec.starting_capital,
            spec.mode,
        );
        if ledger.insert_agent(&agent).await? {
            info!(agent = %spec.id, provider = %spec.provider, model = %spec.model, "agent seeded");
            created += 1;
        }
    }
    Ok(created)
}

/// HTTP sources when configured, otherwise the fixed price table
pub fn build_quote_resolver(cfg: &AppConfig) -> Result<Arc<dyn QuoteResolver>> {
    if !cfg.quotes.sources.is_empty() {
        return Ok(Arc::new(HttpQuoteResolver::new(
            &cfg.quotes,
            cfg.retry.to_policy(),
        )?));
    }

    if cfg.quotes.fixed.is_empty() {
        warn!("no quote sources and no fixed prices configured; every lookup will miss");
    }
    // Config keys may arrive lowercased
    let prices = cfg
        .quotes
        .fixed
        .iter()
        .map(|(symbol, price)| (symbol.to_ascii_uppercase(), *price));
    Ok(Arc::new(StaticQuoteResolver::with_prices(prices)))
}

/// Ledger, quotes and providers assembled into a runner
pub async fn build_runner(cfg: Arc<AppConfig>) -> Result<SessionRunner> {
    let ledger = connect_ledger(&cfg).await?;
    seed_ledger(ledger.as_ref(), &cfg, false).await?;
    let quotes = build_quote_resolver(&cfg)?;
    let providers = ProviderRegistry::from_config(&cfg)?;
    info!(
        agents = cfg.agents.len(),
        providers = providers.len(),
        "session runner ready"
    );
    SessionRunner::new(cfg, ledger, quotes, providers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSpec;
    use crate::domain::{CompetitionMode, ProviderKind};
    use rust_decimal_macros::dec;

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default_config();
        cfg.agents.push(AgentSpec {
            id: "alpha".into(),
            name: "Alpha".into(),
            provider: ProviderKind::Scripted,
            model: "script".into(),
            base_url: None,
            api_key_env: None,
            starting_capital: dec!(10000),
            mode: CompetitionMode::Baseline,
            script: None,
        });
        cfg.quotes.fixed.insert("aapl".into(), dec!(190));
        cfg
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let cfg = config();
        let ledger = MemoryLedger::new();
        assert_eq!(seed_ledger(&ledger, &cfg, false).await.unwrap(), 1);
        assert_eq!(seed_ledger(&ledger, &cfg, false).await.unwrap(), 0);
        assert!(ledger.get_competition().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fixed_quotes_are_uppercased() {
        let resolver = build_quote_resolver(&config()).unwrap();
        let quote = resolver.get_quote("AAPL").await.unwrap().unwrap();
        assert_eq!(quote.price, dec!(190));
    }

    #[tokio::test]
    async fn test_build_runner_with_memory_ledger() {
        let runner = build_runner(Arc::new(config())).await.unwrap();
        assert_eq!(runner.ledger().list_agents().await.unwrap().len(), 1);
    }
}
