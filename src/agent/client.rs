//! Decision adapter: provider call, timeout, retry, JSON extraction and validation
//!
//! Each agent gets one [`DecisionAdapter`]. The orchestrator looks adapters up
//! through a [`ProviderRegistry`] keyed by agent id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::agent::protocol::{AgentDecision, DecisionFailure, RawCompletion};
use crate::agent::provider::{build_provider, DecisionProvider};
use crate::agent::retry::RetryPolicy;
use crate::agent::validator::validate_decision;
use crate::config::AppConfig;
use crate::domain::CallUsage;
use crate::error::{ProviderError, Result};

/// Wraps a provider with the per-call timeout and retry policy
pub struct DecisionAdapter {
    provider: Arc<dyn DecisionProvider>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl DecisionAdapter {
    pub fn new(provider: Arc<dyn DecisionProvider>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            provider,
            retry,
            timeout,
        }
    }

    pub fn provider(&self) -> &Arc<dyn DecisionProvider> {
        &self.provider
    }

    /// Ask the provider for a decision and validate it.
    ///
    /// Only transport-level failures are retried; a well-formed answer that
    /// fails validation is final.
    pub async fn get_decision(
        &self,
        system: &str,
        context: &str,
    ) -> std::result::Result<AgentDecision, DecisionFailure> {
        self.decide(system, context, None).await
    }

    /// Like [`Self::get_decision`], but every attempt and backoff together
    /// must finish before `deadline`.
    pub async fn get_decision_before(
        &self,
        system: &str,
        context: &str,
        deadline: Instant,
    ) -> std::result::Result<AgentDecision, DecisionFailure> {
        self.decide(system, context, Some(deadline)).await
    }

    async fn decide(
        &self,
        system: &str,
        context: &str,
        deadline: Option<Instant>,
    ) -> std::result::Result<AgentDecision, DecisionFailure> {
        let started = Instant::now();
        let model = self.provider.model().to_string();
        let limit = self.timeout;
        let attempts_made = AtomicU32::new(0);

        let retried = self
            .retry
            .run(&model, ProviderError::is_transient, |attempt| {
                let provider = Arc::clone(&self.provider);
                attempts_made.store(attempt, Ordering::Relaxed);
                async move {
                    debug!(model = %provider.model(), attempt, "requesting decision");
                    match timeout(limit, provider.send_prompt(system, context)).await {
                        Ok(res) => res,
                        Err(_) => Err(ProviderError::Timeout {
                            elapsed_ms: limit.as_millis() as u64,
                        }),
                    }
                }
            });

        let (result, attempts) = match deadline {
            None => retried.await,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(started);
                match timeout(remaining, retried).await {
                    Ok(done) => done,
                    Err(_) => {
                        warn!(model = %model, remaining_ms = remaining.as_millis() as u64, "session budget cut the decision call short");
                        (
                            Err(ProviderError::Timeout {
                                elapsed_ms: started.elapsed().as_millis() as u64,
                            }),
                            attempts_made.load(Ordering::Relaxed),
                        )
                    }
                }
            }
        };

        let mut usage = CallUsage {
            tokens: 0,
            latency_ms: started.elapsed().as_millis() as u64,
            attempts,
        };

        let RawCompletion { text, tokens } = match result {
            Ok(completion) => completion,
            Err(error) => {
                warn!(model = %model, attempts, error = %error, "decision call failed");
                return Err(DecisionFailure {
                    error,
                    raw: None,
                    usage,
                });
            }
        };
        usage.tokens = tokens;

        match parse_decision(&text) {
            Ok(decision) => {
                info!(
                    model = %model,
                    sentiment = %decision.sentiment,
                    actions = decision.actions.len(),
                    tokens,
                    latency_ms = usage.latency_ms,
                    "decision received"
                );
                Ok(AgentDecision {
                    decision,
                    raw: text,
                    usage,
                })
            }
            Err(error) => {
                warn!(model = %model, error = %error, "provider answer rejected");
                Err(DecisionFailure {
                    error,
                    raw: Some(text),
                    usage,
                })
            }
        }
    }
}

/// Reduce provider text to its JSON payload and validate it
pub fn parse_decision(text: &str) -> std::result::Result<crate::domain::Decision, ProviderError> {
    let json = extract_json(text);
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| ProviderError::Malformed(format!("answer is not valid JSON: {}", e)))?;
    validate_decision(&value)
}

/// Extract JSON from a response that may contain reasoning, markdown or prose
fn extract_json(text: &str) -> &str {
    // Reasoning models prepend a <think> block that may itself contain braces
    let text = match text.rfind("</think>") {
        Some(end) => &text[end + "</think>".len()..],
        None => text,
    };

    // Try to find JSON in code blocks first
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim();
        }
    }

    // Try generic code blocks
    if let Some(start) = text.find("```") {
        if let Some(end) = text[start + 3..].find("```") {
            let content = text[start + 3..start + 3 + end].trim();
            if content.starts_with('{') {
                return content;
            }
            // Skip language identifier if present
            if let Some(newline) = content.find('\n') {
                return content[newline + 1..].trim();
            }
            return content;
        }
    }

    // Try to find raw JSON object
    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if end > start {
                return &text[start..=end];
            }
        }
    }

    text.trim()
}

/// Decision adapters for every configured agent
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<DecisionAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one adapter per configured agent
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let policy = cfg.retry.to_policy();
        let limit = Duration::from_secs(cfg.provider.timeout_secs);
        let mut registry = Self::new();
        for spec in &cfg.agents {
            let provider = build_provider(spec, &cfg.provider)?;
            registry.insert(
                &spec.id,
                DecisionAdapter::new(provider, policy.clone(), limit),
            );
        }
        Ok(registry)
    }

    pub fn insert(&mut self, agent_id: &str, adapter: DecisionAdapter) {
        self.adapters.insert(agent_id.to_string(), Arc::new(adapter));
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<DecisionAdapter>> {
        self.adapters.get(agent_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::provider::ScriptedProvider;
    use crate::domain::Sentiment;

    const VALID: &str = r#"{"sentiment":"bullish","summary":"s","actions":[{"action":"buy","symbol":"AAPL","quantity":5}]}"#;

    fn adapter(provider: ScriptedProvider, timeout_ms: u64) -> DecisionAdapter {
        let mut retry = RetryPolicy::default();
        retry.base_delay = Duration::ZERO;
        retry.jitter = 0.0;
        DecisionAdapter::new(Arc::new(provider), retry, Duration::from_millis(timeout_ms))
    }

    #[test]
    fn test_extract_json_from_markdown() {
        let text = "Here is my call:\n```json\n{\"a\": 1}\n```\nGood luck";
        assert_eq!(extract_json(text), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_after_think_block() {
        let text = "<think>maybe {buy} or {sell}</think>\nFinal: {\"a\": 2} done";
        assert_eq!(extract_json(text), "{\"a\": 2}");
    }

    #[test]
    fn test_extract_json_raw() {
        assert_eq!(extract_json("  {\"a\": 3}  "), "{\"a\": 3}");
    }

    #[tokio::test]
    async fn test_get_decision_success() {
        let a = adapter(ScriptedProvider::fixed(format!("```json\n{VALID}\n```")), 1000);
        let d = a.get_decision("sys", "ctx").await.unwrap();
        assert_eq!(d.decision.sentiment, Sentiment::Bullish);
        assert_eq!(d.usage.attempts, 1);
        assert!(d.usage.tokens > 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let provider = ScriptedProvider::sequence(vec![
            Err(ProviderError::Status {
                code: 503,
                body: "busy".into(),
            }),
            Ok(VALID.to_string()),
        ]);
        let d = adapter(provider, 1000).get_decision("sys", "ctx").await.unwrap();
        assert_eq!(d.usage.attempts, 2);
    }

    #[tokio::test]
    async fn test_invalid_answer_is_not_retried() {
        let provider = ScriptedProvider::fixed(r#"{"sentiment":"ecstatic","actions":[]}"#);
        let failure = adapter(provider, 1000).get_decision("sys", "ctx").await.unwrap_err();
        assert!(matches!(failure.error, ProviderError::Invalid(_)));
        assert_eq!(failure.usage.attempts, 1);
        assert!(failure.raw.is_some());
    }

    #[tokio::test]
    async fn test_timeout_becomes_provider_error() {
        let provider = ScriptedProvider::fixed(VALID).with_delay(Duration::from_millis(200));
        let mut a = adapter(provider, 20);
        a.retry = RetryPolicy::none();
        let failure = a.get_decision("sys", "ctx").await.unwrap_err();
        assert!(matches!(failure.error, ProviderError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_deadline_bounds_all_attempts() {
        // Three attempts of 200ms each would take 600ms without the deadline
        let provider = ScriptedProvider::fixed(VALID).with_delay(Duration::from_millis(500));
        let a = adapter(provider, 200);
        let started = Instant::now();
        let failure = a
            .get_decision_before("sys", "ctx", started + Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ProviderError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(450));
        assert!(failure.usage.attempts >= 1);
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let failure = adapter(ScriptedProvider::fixed("I refuse to answer"), 1000)
            .get_decision("sys", "ctx")
            .await
            .unwrap_err();
        assert!(matches!(failure.error, ProviderError::Malformed(_)));
    }
}
