use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::domain::{
    Agent, AgentStatus, CompetitionConfig, CompetitionMode, DailySnapshot, DecisionRecord,
    Position, ProviderKind, TradeRecord, TradeSide,
};
use crate::error::{ArenaError, Result};
use crate::ledger::{LedgerStore, PositionChange, Standing, TradeCommit};

/// PostgreSQL ledger
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Create a new PostgreSQL ledger
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_col<T>(raw: &str, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>()
        .map_err(|e| ArenaError::Internal(format!("bad {column} value in ledger: {e}")))
}

fn agent_from_row(r: &PgRow) -> Result<Agent> {
    Ok(Agent {
        id: r.get("id"),
        name: r.get("name"),
        provider: parse_col::<ProviderKind>(r.get("provider"), "provider")?,
        model: r.get("model"),
        starting_capital: r.get("starting_capital"),
        cash: r.get("cash"),
        realized_pnl: r.get("realized_pnl"),
        total_trades: r.get("total_trades"),
        winning_trades: r.get("winning_trades"),
        status: parse_col::<AgentStatus>(r.get("status"), "status")?,
        mode: parse_col::<CompetitionMode>(r.get("mode"), "mode")?,
        last_trade_at: r.get("last_trade_at"),
        portfolio_value: r.get("portfolio_value"),
        rank: r.get("rank"),
        version: r.get("version"),
        created_at: r.get("created_at"),
    })
}

fn position_from_row(r: &PgRow) -> Position {
    Position {
        agent_id: r.get("agent_id"),
        symbol: r.get("symbol"),
        quantity: r.get("quantity"),
        avg_price: r.get("avg_price"),
        current_price: r.get("current_price"),
        opened_at: r.get("opened_at"),
        updated_at: r.get("updated_at"),
        version: r.get("version"),
    }
}

fn trade_from_row(r: &PgRow) -> Result<TradeRecord> {
    let side: String = r.get("side");
    Ok(TradeRecord {
        id: r.get("id"),
        agent_id: r.get("agent_id"),
        session_id: r.get("session_id"),
        symbol: r.get("symbol"),
        side: TradeSide::try_from(side.as_str()).map_err(ArenaError::Internal)?,
        quantity: r.get("quantity"),
        price: r.get("price"),
        fee: r.get("fee"),
        notional: r.get("notional"),
        realized_pnl: r.get("realized_pnl"),
        leverage: r.get("leverage"),
        rationale: r.get("rationale"),
        executed_at: r.get("executed_at"),
    })
}

fn snapshot_from_row(r: &PgRow) -> DailySnapshot {
    DailySnapshot {
        agent_id: r.get("agent_id"),
        date: r.get("date"),
        portfolio_value: r.get("portfolio_value"),
        cash: r.get("cash"),
        holdings_value: r.get("holdings_value"),
        daily_change: r.get("daily_change"),
        cumulative_return_pct: r.get("cumulative_return_pct"),
    }
}

const TRADE_COLUMNS: &str = "id, agent_id, session_id, symbol, side, quantity, price, fee, \
     notional, realized_pnl, leverage, rationale, executed_at";

#[async_trait]
impl LedgerStore for PostgresLedger {
    // ==================== Competition ====================

    async fn get_competition(&self) -> Result<Option<CompetitionConfig>> {
        let row = sqlx::query(
            r#"
            SELECT name, start_date, end_date, fee_rate, min_trade_value, max_position_pct, active
            FROM competition WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| CompetitionConfig {
            name: r.get("name"),
            start_date: r.get("start_date"),
            end_date: r.get("end_date"),
            fee_rate: r.get("fee_rate"),
            min_trade_value: r.get("min_trade_value"),
            max_position_pct: r.get("max_position_pct"),
            active: r.get("active"),
        }))
    }

    #[instrument(skip(self, competition), fields(name = %competition.name))]
    async fn upsert_competition(&self, competition: &CompetitionConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO competition (id, name, start_date, end_date, fee_rate, min_trade_value, max_position_pct, active)
            VALUES (1, $1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date,
                fee_rate = EXCLUDED.fee_rate,
                min_trade_value = EXCLUDED.min_trade_value,
                max_position_pct = EXCLUDED.max_position_pct,
                active = EXCLUDED.active,
                updated_at = NOW()
            "#,
        )
        .bind(&competition.name)
        .bind(competition.start_date)
        .bind(competition.end_date)
        .bind(competition.fee_rate)
        .bind(competition.min_trade_value)
        .bind(competition.max_position_pct)
        .bind(competition.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Agents ====================

    #[instrument(skip(self, agent), fields(agent = %agent.id))]
    async fn insert_agent(&self, agent: &Agent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO agents (
                id, name, provider, model, starting_capital, cash, realized_pnl,
                total_trades, winning_trades, status, mode, last_trade_at,
                portfolio_value, rank, version, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(agent.provider.as_str())
        .bind(&agent.model)
        .bind(agent.starting_capital)
        .bind(agent.cash)
        .bind(agent.realized_pnl)
        .bind(agent.total_trades)
        .bind(agent.winning_trades)
        .bind(agent.status.as_str())
        .bind(agent.mode.as_str())
        .bind(agent.last_trade_at)
        .bind(agent.portfolio_value)
        .bind(agent.rank)
        .bind(agent.version)
        .bind(agent.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = $1")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(agent_from_row).transpose()
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(agent_from_row).collect()
    }

    // ==================== Positions ====================

    async fn get_positions(&self, agent_id: &str) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions WHERE agent_id = $1 ORDER BY symbol")
            .bind(agent_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(position_from_row).collect())
    }

    async fn get_position(&self, agent_id: &str, symbol: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE agent_id = $1 AND symbol = $2")
            .bind(agent_id)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(position_from_row))
    }

    #[instrument(skip(self, prices))]
    async fn mark_positions(
        &self,
        agent_id: &str,
        prices: &HashMap<String, Decimal>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (symbol, price) in prices {
            // Marks do not bump the version; they never race with cash
            sqlx::query(
                "UPDATE positions SET current_price = $1 WHERE agent_id = $2 AND symbol = $3",
            )
            .bind(price)
            .bind(agent_id)
            .bind(symbol)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ==================== Trades ====================

    #[instrument(skip(self, commit), fields(agent = %commit.agent.id, symbol = %commit.trade.symbol))]
    async fn commit_trade(&self, commit: &TradeCommit) -> Result<()> {
        let agent = &commit.agent;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE agents SET
                cash = $3,
                realized_pnl = $4,
                total_trades = $5,
                winning_trades = $6,
                last_trade_at = $7,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(&agent.id)
        .bind(agent.version)
        .bind(agent.cash)
        .bind(agent.realized_pnl)
        .bind(agent.total_trades)
        .bind(agent.winning_trades)
        .bind(agent.last_trade_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            // Dropping the transaction rolls it back
            return Err(ArenaError::VersionConflict {
                entity: "agent",
                id: agent.id.clone(),
                expected: agent.version,
            });
        }

        let position_rows = match &commit.position {
            PositionChange::Open(p) => sqlx::query(
                r#"
                INSERT INTO positions (agent_id, symbol, quantity, avg_price, current_price, opened_at, updated_at, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 0)
                ON CONFLICT (agent_id, symbol) DO NOTHING
                "#,
            )
            .bind(&p.agent_id)
            .bind(&p.symbol)
            .bind(p.quantity)
            .bind(p.avg_price)
            .bind(p.current_price)
            .bind(p.opened_at)
            .bind(p.updated_at)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            PositionChange::Update(p) => sqlx::query(
                r#"
                UPDATE positions SET
                    quantity = $4,
                    avg_price = $5,
                    current_price = $6,
                    updated_at = $7,
                    version = version + 1
                WHERE agent_id = $1 AND symbol = $2 AND version = $3
                "#,
            )
            .bind(&p.agent_id)
            .bind(&p.symbol)
            .bind(p.version)
            .bind(p.quantity)
            .bind(p.avg_price)
            .bind(p.current_price)
            .bind(p.updated_at)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            PositionChange::Close { symbol, version } => {
                sqlx::query(
                    "DELETE FROM positions WHERE agent_id = $1 AND symbol = $2 AND version = $3",
                )
                .bind(&agent.id)
                .bind(symbol)
                .bind(version)
                .execute(&mut *tx)
                .await?
                .rows_affected()
            }
        };

        if position_rows != 1 {
            return Err(ArenaError::VersionConflict {
                entity: "position",
                id: format!("{}/{}", agent.id, commit.position.symbol()),
                expected: match &commit.position {
                    PositionChange::Open(_) => -1,
                    PositionChange::Update(p) => p.version,
                    PositionChange::Close { version, .. } => *version,
                },
            });
        }

        let t = &commit.trade;
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, agent_id, session_id, symbol, side, quantity, price, fee,
                notional, realized_pnl, leverage, rationale, executed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(t.id)
        .bind(&t.agent_id)
        .bind(t.session_id)
        .bind(&t.symbol)
        .bind(t.side.as_str())
        .bind(t.quantity)
        .bind(t.price)
        .bind(t.fee)
        .bind(t.notional)
        .bind(t.realized_pnl)
        .bind(t.leverage)
        .bind(&t.rationale)
        .bind(t.executed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(trade_id = %t.id, "trade committed");
        Ok(())
    }

    async fn recent_trades(&self, agent_id: &str, limit: usize) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE agent_id = $1 ORDER BY executed_at DESC LIMIT $2"
        ))
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn list_trades(&self, agent_id: &str) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE agent_id = $1 ORDER BY executed_at ASC"
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    // ==================== Decisions ====================

    #[instrument(skip(self, record), fields(agent = %record.agent_id, slot = %record.slot))]
    async fn record_decision(&self, record: &DecisionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO decisions (
                id, session_id, slot, agent_id, sentiment, actions, summary,
                raw_response, tokens_used, latency_ms, outcome, error, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id)
        .bind(record.session_id)
        .bind(&record.slot)
        .bind(&record.agent_id)
        .bind(record.sentiment.map(|s| s.as_str()))
        .bind(&record.actions)
        .bind(&record.summary)
        .bind(&record.raw_response)
        .bind(record.tokens_used as i64)
        .bind(record.latency_ms as i64)
        .bind(record.outcome.as_str())
        .bind(&record.error)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_decision_in_slot(&self, agent_id: &str, slot: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM decisions WHERE agent_id = $1 AND slot = $2) AS found",
        )
        .bind(agent_id)
        .bind(slot)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("found"))
    }

    // ==================== Valuation ====================

    #[instrument(skip(self, standings), fields(agents = standings.len()))]
    async fn update_rankings(&self, standings: &[Standing]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for s in standings {
            sqlx::query("UPDATE agents SET portfolio_value = $1, rank = $2 WHERE id = $3")
                .bind(s.portfolio_value)
                .bind(s.rank)
                .bind(&s.agent_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_snapshot(&self, snapshot: &DailySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_snapshots (
                agent_id, date, portfolio_value, cash, holdings_value, daily_change, cumulative_return_pct
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (agent_id, date) DO UPDATE SET
                portfolio_value = EXCLUDED.portfolio_value,
                cash = EXCLUDED.cash,
                holdings_value = EXCLUDED.holdings_value,
                daily_change = EXCLUDED.daily_change,
                cumulative_return_pct = EXCLUDED.cumulative_return_pct
            "#,
        )
        .bind(&snapshot.agent_id)
        .bind(snapshot.date)
        .bind(snapshot.portfolio_value)
        .bind(snapshot.cash)
        .bind(snapshot.holdings_value)
        .bind(snapshot.daily_change)
        .bind(snapshot.cumulative_return_pct)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_snapshots(&self, agent_id: &str) -> Result<Vec<DailySnapshot>> {
        let rows = sqlx::query("SELECT * FROM daily_snapshots WHERE agent_id = $1 ORDER BY date")
            .bind(agent_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(snapshot_from_row).collect())
    }
}
