//! Quote resolution
//!
//! [`QuoteResolver`] is the engine's only view of market prices. Batch
//! lookups run per chunk with bounded concurrency and a pause between chunks;
//! symbols that fail are logged and left out.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::QuotesConfig;
use crate::domain::Quote;
use crate::error::Result;

/// Chunking and pacing for batch quote lookups
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub batch_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_concurrency: 5,
            batch_delay: Duration::from_millis(200),
        }
    }
}

impl From<&QuotesConfig> for BatchOptions {
    fn from(cfg: &QuotesConfig) -> Self {
        Self {
            batch_size: cfg.batch_size.max(1),
            max_concurrency: cfg.max_concurrency.max(1),
            batch_delay: Duration::from_millis(cfg.batch_delay_ms),
        }
    }
}

#[async_trait]
pub trait QuoteResolver: Send + Sync {
    /// Latest quote, `Ok(None)` when the symbol is unknown
    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>>;

    /// Quotes for many symbols; missing or failed symbols are absent
    async fn get_quotes_batch(&self, symbols: &[String]) -> HashMap<String, Quote>;
}

/// Look symbols up chunk by chunk through `resolver.get_quote`
pub async fn fetch_batched<R>(
    resolver: &R,
    symbols: &[String],
    opts: &BatchOptions,
) -> HashMap<String, Quote>
where
    R: QuoteResolver + ?Sized,
{
    let unique: Vec<&String> = symbols
        .iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut quotes = HashMap::with_capacity(unique.len());

    for (i, chunk) in unique.chunks(opts.batch_size.max(1)).enumerate() {
        if i > 0 && !opts.batch_delay.is_zero() {
            tokio::time::sleep(opts.batch_delay).await;
        }

        // Owned symbols keep the futures Send under #[async_trait]
        let lookups: Vec<_> = chunk
            .iter()
            .map(|s| (*s).clone())
            .map(|symbol| async move {
                let result = resolver.get_quote(&symbol).await;
                (symbol, result)
            })
            .collect();
        let results: Vec<_> = stream::iter(lookups)
            .buffer_unordered(opts.max_concurrency.max(1))
            .collect()
            .await;

        for (symbol, result) in results {
            match result {
                Ok(Some(quote)) => {
                    quotes.insert(symbol, quote);
                }
                Ok(None) => debug!(symbol = %symbol, "no quote"),
                Err(e) => warn!(symbol = %symbol, error = %e, "quote lookup failed"),
            }
        }
    }

    quotes
}

/// Fixed quotes held in memory; used offline and in tests
#[derive(Default)]
pub struct StaticQuoteResolver {
    quotes: RwLock<HashMap<String, Quote>>,
}

impl StaticQuoteResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prices<I, S>(prices: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        let quotes = prices
            .into_iter()
            .map(|(symbol, price)| {
                let symbol = symbol.into();
                (symbol.clone(), Quote::new(symbol, price))
            })
            .collect();
        Self {
            quotes: RwLock::new(quotes),
        }
    }

    pub async fn set_quote(&self, quote: Quote) {
        self.quotes.write().await.insert(quote.symbol.clone(), quote);
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.set_quote(Quote::new(symbol, price)).await;
    }

    pub async fn remove(&self, symbol: &str) {
        self.quotes.write().await.remove(symbol);
    }
}

#[async_trait]
impl QuoteResolver for StaticQuoteResolver {
    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>> {
        Ok(self.quotes.read().await.get(symbol).cloned())
    }

    async fn get_quotes_batch(&self, symbols: &[String]) -> HashMap<String, Quote> {
        let quotes = self.quotes.read().await;
        symbols
            .iter()
            .filter_map(|s| quotes.get(s).map(|q| (s.clone(), q.clone())))
            .collect()
    }
}
