//! Output formatting for `arena` commands.
//!
//! Supports two modes: human-readable tables (default) and JSON (--json).

use serde::Serialize;
use tabled::{Table, Tabled};

use crate::domain::DailySnapshot;
use crate::engine::{AgentResult, SessionReport};

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                let table = Table::new(items).to_string();
                println!("{table}");
            }
        }
        OutputMode::Json => {
            let json = serde_json::to_string_pretty(items)?;
            println!("{json}");
        }
    }
    Ok(())
}

/// Print a single Serialize item as pretty JSON.
pub fn print_item<T: Serialize>(item: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}

#[derive(Debug, Serialize, Tabled)]
pub struct AgentResultRow {
    #[tabled(rename = "Agent")]
    pub agent: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Executed")]
    pub executed: usize,
    #[tabled(rename = "Rejected")]
    pub rejected: usize,
    #[tabled(rename = "Tokens")]
    pub tokens: u64,
    #[tabled(rename = "Latency (ms)")]
    pub latency_ms: u64,
    #[tabled(rename = "Note")]
    pub note: String,
}

impl From<&AgentResult> for AgentResultRow {
    fn from(r: &AgentResult) -> Self {
        let note = r
            .error
            .clone()
            .or_else(|| r.skip_reason.clone())
            .unwrap_or_else(|| truncate(&r.summary, 60));
        Self {
            agent: r.agent_id.clone(),
            status: r.status.as_str().to_string(),
            executed: r.actions.iter().filter(|a| a.is_executed()).count(),
            rejected: r.actions.iter().filter(|a| a.is_rejected()).count(),
            tokens: r.tokens,
            latency_ms: r.latency_ms,
            note,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct SnapshotRow {
    #[tabled(rename = "Agent")]
    pub agent: String,
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Cash")]
    pub cash: String,
    #[tabled(rename = "Day Δ")]
    pub daily_change: String,
    #[tabled(rename = "Return %")]
    pub cumulative_return_pct: String,
}

impl From<&DailySnapshot> for SnapshotRow {
    fn from(s: &DailySnapshot) -> Self {
        Self {
            agent: s.agent_id.clone(),
            date: s.date.to_string(),
            value: format!("{:.2}", s.portfolio_value),
            cash: format!("{:.2}", s.cash),
            daily_change: format!("{:+.2}", s.daily_change),
            cumulative_return_pct: format!("{:+.2}", s.cumulative_return_pct),
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

/// Human summary of a session report
pub fn print_session_report(report: &SessionReport, mode: OutputMode) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        return print_item(report);
    }

    println!(
        "session {} [{}]{}",
        report.session_id,
        report.state,
        if report.dry_run { " (dry run)" } else { "" }
    );
    if let Some(gate) = &report.gate {
        println!("gate: {}", serde_json::to_string(gate)?);
    }
    let rows: Vec<AgentResultRow> = report.agents.iter().map(AgentResultRow::from).collect();
    if !rows.is_empty() {
        print_items(&rows, OutputMode::Table)?;
    }
    let t = &report.totals;
    println!(
        "trades executed: {} | rejected: {} | failed agents: {} | tokens: {} | provider latency: {}ms",
        t.trades_executed, t.trades_rejected, t.agents_failed, t.tokens, t.provider_latency_ms
    );
    for err in &report.errors {
        println!("error: {err}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AgentRunStatus;

    #[test]
    fn test_row_prefers_error_over_summary() {
        let mut r = AgentResult::failed("a", "timed out after 60000ms");
        r.summary = "ignored".into();
        let row = AgentResultRow::from(&r);
        assert_eq!(row.status, "failed");
        assert_eq!(row.note, "timed out after 60000ms");

        let mut ok = AgentResult::new("b", AgentRunStatus::NoAction);
        ok.summary = "x".repeat(100);
        assert_eq!(AgentResultRow::from(&ok).note.chars().count(), 60);
    }
}
