//! Decision providers for competing agents
//!
//! This module provides:
//! - Provider clients for OpenAI-compatible, Anthropic and Gemini APIs
//! - A scripted provider for offline sessions
//! - Response validation into typed decisions
//! - The retry policy applied to every outbound call

pub mod client;
pub mod protocol;
pub mod provider;
pub mod retry;
pub mod validator;

pub use client::{parse_decision, DecisionAdapter, ProviderRegistry};
pub use protocol::{AgentDecision, DecisionFailure, RawCompletion, DECISION_SCHEMA};
pub use provider::{
    build_provider, AnthropicProvider, DecisionProvider, EndpointConfig, GeminiProvider,
    OpenAiCompatibleProvider, ScriptedProvider,
};
pub use retry::{Backoff, RetryPolicy};
pub use validator::validate_decision;
