use config::{Config, ConfigError, Environment, File};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use crate::agent::retry::{Backoff, RetryPolicy};
use crate::domain::{CompetitionConfig, CompetitionMode, ProviderKind};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub competition: CompetitionSettings,
    #[serde(default)]
    pub trading_window: TradingWindowConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub modes: ModeRulesConfig,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub quotes: QuotesConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Competition rules used to seed the ledger's competition row
#[derive(Debug, Clone, Deserialize)]
pub struct CompetitionSettings {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Fee per side as a fraction of notional (0.0015 = 0.15%)
    pub fee_rate: Decimal,
    /// Minimum trade notional
    pub min_trade_value: Decimal,
    /// Max single-position share of portfolio (0.30 = 30%)
    pub max_position_pct: Decimal,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl CompetitionSettings {
    pub fn to_competition(&self) -> CompetitionConfig {
        CompetitionConfig {
            name: self.name.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
            fee_rate: self.fee_rate,
            min_trade_value: self.min_trade_value,
            max_position_pct: self.max_position_pct,
            active: self.active,
        }
    }
}

/// Weekday + hour-of-day gate in a fixed exchange offset
#[derive(Debug, Clone, Deserialize)]
pub struct TradingWindowConfig {
    /// Exchange offset from UTC in minutes (-300 = UTC-5)
    pub utc_offset_minutes: i32,
    /// Trading weekdays, 1 = Monday .. 7 = Sunday
    pub weekdays: Vec<u32>,
    /// Local session windows as "HH:MM-HH:MM"
    pub windows: Vec<String>,
}

impl Default for TradingWindowConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: -300,
            weekdays: vec![1, 2, 3, 4, 5],
            windows: vec!["09:30-16:00".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Hard wall-clock budget for one session
    pub budget_secs: u64,
    /// Trades shown to an agent in its brief
    pub recent_trades: usize,
    /// Top-scored candidates shown in the brief
    pub max_candidates: usize,
    /// Upper bound on the brief length
    pub brief_max_chars: usize,
    /// Candidate instrument universe
    pub universe: Vec<String>,
    /// Optional JSON file with a list of candidate fundamentals
    #[serde(default)]
    pub fundamentals_file: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            budget_secs: 600,
            recent_trades: 10,
            max_candidates: 15,
            brief_max_chars: 6000,
            universe: Vec::new(),
            fundamentals_file: None,
        }
    }
}

/// Parameters of the mode-specific rule bundles
#[derive(Debug, Clone, Deserialize)]
pub struct ModeRulesConfig {
    /// Position cap for capital-preservation agents (0.15 = 15%)
    pub preservation_max_position_pct: Decimal,
    pub min_leverage: Decimal,
    pub max_leverage: Decimal,
}

impl Default for ModeRulesConfig {
    fn default() -> Self {
        Self {
            preservation_max_position_pct: Decimal::new(15, 2),
            min_leverage: Decimal::ONE,
            max_leverage: Decimal::from(3),
        }
    }
}

/// One competitor's provider wiring
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub name: String,
    pub provider: ProviderKind,
    pub model: String,
    /// Overrides the provider's default endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub starting_capital: Decimal,
    #[serde(default)]
    pub mode: CompetitionMode,
    /// Fixed response for `scripted` providers
    #[serde(default)]
    pub script: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Per-call timeout; must stay well under the session budget
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_tokens: 2000,
            temperature: 0.3,
        }
    }
}

/// One upstream quote source, tried in configured order
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteSourceConfig {
    pub name: String,
    /// `yahoo` or `finnhub`
    pub kind: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotesConfig {
    #[serde(default)]
    pub sources: Vec<QuoteSourceConfig>,
    pub max_concurrency: usize,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub timeout_secs: u64,
    /// Fixed prices used when no source is configured
    #[serde(default)]
    pub fixed: std::collections::HashMap<String, Decimal>,
}

impl Default for QuotesConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            max_concurrency: 5,
            batch_size: 20,
            batch_delay_ms: 200,
            timeout_secs: 10,
            fixed: std::collections::HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// constant | linear | exponential
    pub backoff: String,
    /// Fraction of the delay added as random jitter (0.25 = up to +25%)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff: "exponential".to_string(),
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        let backoff = match self.backoff.to_ascii_lowercase().as_str() {
            "constant" => Backoff::Constant,
            "linear" => Backoff::Linear,
            _ => Backoff::Exponential,
        };
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: std::time::Duration::from_millis(self.base_delay_ms),
            max_delay: std::time::Duration::from_millis(self.max_delay_ms),
            backoff,
            jitter: self.jitter.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; `memory` runs against the in-process ledger
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url.trim().eq_ignore_ascii_case("memory")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    /// Environment variable holding the trigger bearer token
    pub trigger_token_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            trigger_token_env: "ARENA_TRIGGER_TOKEN".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn trigger_token(&self) -> Option<String> {
        std::env::var(&self.trigger_token_env)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Annual reference rate for the Sharpe-style ratio
    pub risk_free_rate: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { risk_free_rate: 0.02 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for the daily rolling log file
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.url", "memory")?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("ARENA_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (ARENA_COMPETITION__FEE_RATE, etc.)
            .add_source(
                Environment::with_prefix("ARENA")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Self-contained configuration: in-memory ledger, scripted agents
    pub fn default_config() -> Self {
        use rust_decimal_macros::dec;

        Self {
            competition: CompetitionSettings {
                name: "default".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap_or_default(),
                end_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap_or_default(),
                fee_rate: dec!(0.0015),
                min_trade_value: dec!(100),
                max_position_pct: dec!(0.30),
                active: true,
            },
            trading_window: TradingWindowConfig::default(),
            session: SessionConfig::default(),
            modes: ModeRulesConfig::default(),
            agents: Vec::new(),
            provider: ProviderConfig::default(),
            quotes: QuotesConfig::default(),
            retry: RetryConfig::default(),
            database: DatabaseConfig {
                url: "memory".to_string(),
                max_connections: 5,
            },
            server: ServerConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let c = &self.competition;

        if c.end_date < c.start_date {
            errors.push("competition.end_date must not precede start_date".to_string());
        }
        if c.fee_rate < Decimal::ZERO || c.fee_rate >= Decimal::ONE {
            errors.push("competition.fee_rate must be in [0, 1)".to_string());
        }
        if c.min_trade_value < Decimal::ZERO {
            errors.push("competition.min_trade_value must not be negative".to_string());
        }
        if c.max_position_pct <= Decimal::ZERO || c.max_position_pct > Decimal::ONE {
            errors.push("competition.max_position_pct must be in (0, 1]".to_string());
        }

        if self.modes.min_leverage <= Decimal::ZERO || self.modes.max_leverage < self.modes.min_leverage {
            errors.push("modes: leverage range must be positive and ordered".to_string());
        }
        if self.modes.preservation_max_position_pct <= Decimal::ZERO
            || self.modes.preservation_max_position_pct > c.max_position_pct
        {
            errors.push(
                "modes.preservation_max_position_pct must be positive and not above competition cap"
                    .to_string(),
            );
        }

        if self.provider.timeout_secs == 0 {
            errors.push("provider.timeout_secs must be positive".to_string());
        }
        // A single hung call must not be able to eat the whole session.
        if self.provider.timeout_secs.saturating_mul(2) > self.session.budget_secs {
            errors.push(format!(
                "provider.timeout_secs ({}) must be at most half of session.budget_secs ({})",
                self.provider.timeout_secs, self.session.budget_secs
            ));
        }

        if self.trading_window.weekdays.iter().any(|d| !(1..=7).contains(d)) {
            errors.push("trading_window.weekdays must be in 1..=7".to_string());
        }
        if let Err(e) = crate::engine::calendar::TradingCalendar::from_config(&self.trading_window) {
            errors.push(e.to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id.as_str()) {
                errors.push(format!("duplicate agent id '{}'", agent.id));
            }
            if agent.starting_capital <= Decimal::ZERO {
                errors.push(format!("agent '{}': starting_capital must be positive", agent.id));
            }
        }

        for symbol in &self.session.universe {
            if !crate::domain::is_valid_symbol(symbol.trim()) {
                errors.push(format!("session.universe: '{symbol}' is not a ticker"));
            }
        }

        if self.quotes.max_concurrency == 0 || self.quotes.batch_size == 0 {
            errors.push("quotes.max_concurrency and quotes.batch_size must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
