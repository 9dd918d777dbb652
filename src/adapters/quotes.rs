//! HTTP quote sources
//!
//! Sources are tried in configured order for each symbol; the first one that
//! returns a usable price wins. Supported kinds:
//! - `yahoo`: chart endpoint, `chart.result[0].meta`
//! - `finnhub`: `/quote` endpoint, `c` / `pc` fields

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::agent::retry::RetryPolicy;
use crate::config::{QuoteSourceConfig, QuotesConfig};
use crate::domain::{is_valid_symbol, Quote};
use crate::error::{ArenaError, ProviderError, Result};
use crate::market::{fetch_batched, BatchOptions, QuoteResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Yahoo,
    Finnhub,
}

#[derive(Debug, Clone)]
struct QuoteSource {
    name: String,
    kind: SourceKind,
    base_url: String,
    api_key: Option<String>,
}

impl QuoteSource {
    fn from_config(cfg: &QuoteSourceConfig) -> Result<Self> {
        let kind = match cfg.kind.trim().to_ascii_lowercase().as_str() {
            "yahoo" => SourceKind::Yahoo,
            "finnhub" => SourceKind::Finnhub,
            other => {
                return Err(ArenaError::Validation(format!(
                    "quote source '{}' has unknown kind '{other}'",
                    cfg.name
                )))
            }
        };
        let api_key = cfg
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty());
        Ok(Self {
            name: cfg.name.clone(),
            kind,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

fn decimal(v: Option<&Value>) -> Option<Decimal> {
    let n = v?.as_f64()?;
    if !n.is_finite() || n <= 0.0 {
        return None;
    }
    Decimal::try_from(n).ok().map(|d| d.round_dp(4))
}

fn parse_yahoo(symbol: &str, body: &Value) -> Option<Quote> {
    let meta = body.pointer("/chart/result/0/meta")?;
    let price = decimal(meta.get("regularMarketPrice"))?;
    Some(Quote {
        symbol: symbol.to_string(),
        price,
        previous_close: decimal(meta.get("chartPreviousClose"))
            .or_else(|| decimal(meta.get("previousClose"))),
        volume: decimal(meta.get("regularMarketVolume")),
        as_of: Utc::now(),
    })
}

fn parse_finnhub(symbol: &str, body: &Value) -> Option<Quote> {
    // Finnhub answers unknown symbols with zeros
    let price = decimal(body.get("c"))?;
    Some(Quote {
        symbol: symbol.to_string(),
        price,
        previous_close: decimal(body.get("pc")),
        volume: None,
        as_of: Utc::now(),
    })
}

/// Quote resolver backed by one or more HTTP sources
pub struct HttpQuoteResolver {
    sources: Vec<QuoteSource>,
    http: Client,
    retry: RetryPolicy,
    batch: BatchOptions,
}

impl HttpQuoteResolver {
    pub fn new(cfg: &QuotesConfig, retry: RetryPolicy) -> Result<Self> {
        let sources = cfg
            .sources
            .iter()
            .map(QuoteSource::from_config)
            .collect::<Result<Vec<_>>>()?;
        if sources.is_empty() {
            return Err(ArenaError::Validation("no quote sources configured".to_string()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent("arena/0.1")
            .build()
            .map_err(|e| ArenaError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            sources,
            http,
            retry,
            batch: BatchOptions::from(cfg),
        })
    }

    async fn fetch_once(
        &self,
        source: &QuoteSource,
        symbol: &str,
    ) -> std::result::Result<Option<Quote>, ProviderError> {
        let request = match source.kind {
            SourceKind::Yahoo => self
                .http
                .get(format!("{}/v8/finance/chart/{}", source.base_url, symbol))
                .query(&[("interval", "1d"), ("range", "5d")]),
            SourceKind::Finnhub => {
                let token = source.api_key.as_deref().ok_or_else(|| {
                    ProviderError::NotConfigured(format!("{} API key missing", source.name))
                })?;
                self.http
                    .get(format!("{}/quote", source.base_url))
                    .query(&[("symbol", symbol), ("token", token)])
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                code: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        Ok(match source.kind {
            SourceKind::Yahoo => parse_yahoo(symbol, &body),
            SourceKind::Finnhub => parse_finnhub(symbol, &body),
        })
    }
}

#[async_trait]
impl QuoteResolver for HttpQuoteResolver {
    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>> {
        // Symbols end up in URL paths
        if !is_valid_symbol(symbol) {
            warn!(symbol, "refusing to look up malformed symbol");
            return Ok(None);
        }
        let mut last_error = None;

        for source in &self.sources {
            let (result, attempts) = self
                .retry
                .run(&source.name, ProviderError::is_transient, |_| {
                    self.fetch_once(source, symbol)
                })
                .await;
            match result {
                Ok(Some(quote)) => {
                    debug!(symbol, source = %source.name, price = %quote.price, "quote resolved");
                    return Ok(Some(quote));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(symbol, source = %source.name, attempts, error = %e, "quote source failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(ArenaError::QuoteUnavailable(format!("{symbol}: {e}"))),
            None => Ok(None),
        }
    }

    async fn get_quotes_batch(&self, symbols: &[String]) -> HashMap<String, Quote> {
        fetch_batched(self, symbols, &self.batch).await
    }
}
