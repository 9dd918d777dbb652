//! Structural validation of provider output.
//!
//! Providers answer in loosely shaped JSON. Nothing reaches the executor until
//! it has been turned into a typed [`Decision`] here.

use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::domain::{is_valid_symbol, ActionSide, Decision, ProposedAction, Sentiment};
use crate::error::ProviderError;

/// Largest share count a single action may ask for
pub const MAX_ACTION_QUANTITY: f64 = 1e9;

fn invalid(msg: impl Into<String>) -> ProviderError {
    ProviderError::Invalid(msg.into())
}

/// First present key among `keys`
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k)).filter(|v| !v.is_null())
}

/// Finite number from a JSON number or numeric string
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn optional_positive(
    obj: &Map<String, Value>,
    keys: &[&str],
    idx: usize,
) -> Result<Option<Decimal>, ProviderError> {
    let Some(raw) = field(obj, keys) else {
        return Ok(None);
    };
    let n = number(raw)
        .ok_or_else(|| invalid(format!("actions[{idx}].{} is not a finite number", keys[0])))?;
    if n <= 0.0 {
        return Err(invalid(format!("actions[{idx}].{} must be positive", keys[0])));
    }
    Decimal::try_from(n)
        .map(Some)
        .map_err(|_| invalid(format!("actions[{idx}].{} out of range", keys[0])))
}

fn string_list(obj: &Map<String, Value>, keys: &[&str]) -> Result<Vec<String>, ProviderError> {
    match field(obj, keys) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect()),
        Some(_) => Err(invalid(format!("{} must be an array", keys[0]))),
    }
}

fn parse_sentiment(obj: &Map<String, Value>) -> Result<Sentiment, ProviderError> {
    let raw = field(obj, &["sentiment", "market_sentiment"])
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("sentiment missing"))?;
    raw.parse::<Sentiment>()
        .map_err(|_| invalid(format!("sentiment '{raw}' not one of bullish|bearish|neutral")))
}

fn parse_action(idx: usize, value: &Value) -> Result<ProposedAction, ProviderError> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid(format!("actions[{idx}] is not an object")))?;

    let side = match field(obj, &["action", "side", "type"])
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_ascii_lowercase())
        .as_deref()
    {
        Some("buy") => ActionSide::Buy,
        Some("sell") => ActionSide::Sell,
        Some("hold") => ActionSide::Hold,
        Some(other) => return Err(invalid(format!("actions[{idx}].action '{other}' unknown"))),
        None => return Err(invalid(format!("actions[{idx}].action missing"))),
    };

    let symbol = field(obj, &["symbol", "ticker", "instrument"])
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid(format!("actions[{idx}].symbol missing")))?;
    if !is_valid_symbol(&symbol) {
        return Err(invalid(format!("actions[{idx}].symbol '{symbol}' is not a ticker")));
    }

    let quantity = match field(obj, &["quantity", "shares", "qty"]) {
        Some(raw) => {
            let n = number(raw).ok_or_else(|| {
                invalid(format!("actions[{idx}].quantity is not a finite number"))
            })?;
            if side != ActionSide::Hold && n <= 0.0 {
                return Err(invalid(format!("actions[{idx}].quantity must be positive")));
            }
            if n > MAX_ACTION_QUANTITY {
                return Err(invalid(format!(
                    "actions[{idx}].quantity {n} above limit {MAX_ACTION_QUANTITY}"
                )));
            }
            Decimal::try_from(n.max(0.0))
                .map_err(|_| invalid(format!("actions[{idx}].quantity out of range")))?
        }
        None if side == ActionSide::Hold => Decimal::ZERO,
        None => return Err(invalid(format!("actions[{idx}].quantity missing"))),
    };

    let confidence = match field(obj, &["confidence"]) {
        Some(raw) => {
            let c = number(raw)
                .ok_or_else(|| invalid(format!("actions[{idx}].confidence is not a number")))?;
            if !(0.0..=100.0).contains(&c) {
                return Err(invalid(format!("actions[{idx}].confidence {c} outside 0-100")));
            }
            Some(c)
        }
        None => None,
    };

    let rationale = field(obj, &["reason", "rationale", "reasoning"])
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(ProposedAction {
        side,
        symbol,
        quantity,
        target_price: optional_positive(obj, &["target_price", "targetPrice", "target"], idx)?,
        stop_loss: optional_positive(obj, &["stop_loss", "stopLoss", "stop"], idx)?,
        leverage: optional_positive(obj, &["leverage"], idx)?,
        confidence,
        rationale,
    })
}

/// Turn a provider's JSON payload into a typed decision or reject it.
pub fn validate_decision(value: &Value) -> Result<Decision, ProviderError> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("decision is not a JSON object"))?;

    let sentiment = parse_sentiment(obj)?;

    let actions = match field(obj, &["actions", "trades", "decisions"]) {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(idx, v)| parse_action(idx, v))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(invalid("actions must be an array")),
        None => return Err(invalid("actions missing")),
    };

    let summary = field(obj, &["summary", "analysis"])
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(Decision {
        sentiment,
        top_picks: string_list(obj, &["top_picks", "topPicks"])?,
        avoid_list: string_list(obj, &["avoid_list", "avoidList", "avoid"])?,
        summary,
        actions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_decision() {
        let v = json!({
            "sentiment": "Bullish",
            "topPicks": ["aapl", "msft"],
            "summary": "tech looks strong",
            "actions": [
                {"action": "BUY", "symbol": "aapl", "quantity": 10, "confidence": 80, "reason": "momentum"},
                {"action": "hold", "symbol": "MSFT"}
            ]
        });
        let d = validate_decision(&v).unwrap();
        assert_eq!(d.sentiment, Sentiment::Bullish);
        assert_eq!(d.top_picks, vec!["AAPL", "MSFT"]);
        assert_eq!(d.actions.len(), 2);
        assert_eq!(d.actions[0].symbol, "AAPL");
        assert_eq!(d.actions[0].quantity, dec!(10));
        assert_eq!(d.actions[0].confidence, Some(80.0));
        assert_eq!(d.actions[1].side, ActionSide::Hold);
        assert_eq!(d.actions[1].quantity, Decimal::ZERO);
    }

    #[test]
    fn rejects_unknown_sentiment() {
        let v = json!({"sentiment": "euphoric", "actions": []});
        assert!(matches!(validate_decision(&v), Err(ProviderError::Invalid(_))));
    }

    #[test]
    fn rejects_missing_actions_array() {
        let v = json!({"sentiment": "neutral"});
        assert!(validate_decision(&v).is_err());
        let v = json!({"sentiment": "neutral", "actions": "buy everything"});
        assert!(validate_decision(&v).is_err());
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let v = json!({
            "sentiment": "neutral",
            "actions": [{"action": "buy", "symbol": "X", "quantity": 1, "confidence": 150}]
        });
        assert!(validate_decision(&v).is_err());
    }

    #[test]
    fn rejects_non_positive_trade_quantity() {
        let v = json!({
            "sentiment": "bearish",
            "actions": [{"action": "sell", "symbol": "X", "quantity": 0}]
        });
        assert!(validate_decision(&v).is_err());
    }

    #[test]
    fn rejects_absurd_quantity() {
        let v = json!({
            "sentiment": "bullish",
            "actions": [{"action": "buy", "symbol": "AAPL", "quantity": 1e28}]
        });
        assert!(matches!(validate_decision(&v), Err(ProviderError::Invalid(_))));
    }

    #[test]
    fn rejects_symbol_outside_ticker_charset() {
        let v = json!({
            "sentiment": "neutral",
            "actions": [{"action": "buy", "symbol": "aapl/../../v7?x=1", "quantity": 1}]
        });
        assert!(matches!(validate_decision(&v), Err(ProviderError::Invalid(_))));
    }

    #[test]
    fn accepts_numeric_strings() {
        let v = json!({
            "sentiment": "neutral",
            "actions": [{"action": "buy", "symbol": "X", "quantity": "25", "leverage": "2"}]
        });
        let d = validate_decision(&v).unwrap();
        assert_eq!(d.actions[0].quantity, dec!(25));
        assert_eq!(d.actions[0].leverage, Some(dec!(2)));
    }
}
