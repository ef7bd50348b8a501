//! Execution with automatic failover across the fallback chain.
//!
//! The executor walks the decision's chain — primary first, then fallbacks in
//! order — calling the external completion client with a per-arm timeout.
//! Failures are classified and recorded; the first success wins. The
//! executor mutates no bandit state and persists nothing: attribution of the
//! collected failures is the caller's job.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CallError, ExecutionError};
use crate::models::{Response, RoutingDecision};

/// Output of one successful external LLM call.
#[derive(Debug, Clone)]
pub struct CompletionOutput {
    /// Response text (JSON for structured outputs).
    pub text: String,
    /// Cost in dollars.
    pub cost: f64,
    /// Latency in seconds.
    pub latency: f64,
    /// Total tokens used.
    pub tokens: u32,
    /// Client-side quality estimate (0.0 - 1.0), when the caller has one
    /// (schema validity, judge score). `None` falls back to the arm's prior.
    pub quality: Option<f64>,
}

/// Black-box LLM call interface.
///
/// Implementations own per-arm retries and provider specifics; the executor
/// only retries across *different* arms.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Call the given model with the prompt and an optional JSON schema the
    /// response text must conform to. Schema violations are surfaced as
    /// [`CallError::SchemaParse`].
    async fn call(
        &self,
        model_id: &str,
        prompt: &str,
        schema: Option<&serde_json::Value>,
    ) -> Result<CompletionOutput, CallError>;
}

/// Result of executing a routing decision.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The successful response.
    pub response: Response,
    /// Arm that actually served the request.
    pub model_used: String,
    /// True when a fallback arm served the request.
    pub was_fallback: bool,
    /// The decision's primary arm.
    pub original_model: String,
    /// Arms that failed before the success, in attempt order.
    pub failed_models: Vec<String>,
    /// Observed quality estimate passed through from the client, if any.
    pub quality: Option<f64>,
}

/// Executes routing decisions against a completion client.
#[derive(Debug, Clone)]
pub struct ModelExecutor {
    timeout: Duration,
}

impl ModelExecutor {
    /// Create an executor with the given per-arm timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Per-arm timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Try the primary, then each fallback in order, until one call succeeds.
    ///
    /// # Errors
    ///
    /// `ExecutionError::AllModelsFailed` with the ordered per-arm errors when
    /// every arm in the chain fails.
    pub async fn execute_with_fallback(
        &self,
        client: &dyn CompletionClient,
        decision: &RoutingDecision,
        prompt: &str,
        schema: Option<&serde_json::Value>,
    ) -> Result<ExecutionResult, ExecutionError> {
        let mut chain = Vec::with_capacity(1 + decision.fallback_chain.len());
        chain.push(decision.selected_model.as_str());
        for model in &decision.fallback_chain {
            if model != &decision.selected_model {
                chain.push(model.as_str());
            }
        }

        let mut errors: Vec<(String, CallError)> = Vec::new();

        for model_id in chain {
            match self.call_one(client, model_id, prompt, schema).await {
                Ok(output) => {
                    let was_fallback = model_id != decision.selected_model;
                    if was_fallback {
                        tracing::info!(
                            model = model_id,
                            original = %decision.selected_model,
                            failed = errors.len(),
                            "fallback arm served the request"
                        );
                    }
                    let response = Response::new(
                        decision.query_id.clone(),
                        model_id,
                        output.text,
                        output.cost,
                        output.latency,
                        output.tokens,
                    );
                    return Ok(ExecutionResult {
                        response,
                        model_used: model_id.to_string(),
                        was_fallback,
                        original_model: decision.selected_model.clone(),
                        failed_models: errors.iter().map(|(m, _)| m.clone()).collect(),
                        quality: output.quality,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        model = model_id,
                        error = %err,
                        "model failed, trying next in fallback chain"
                    );
                    errors.push((model_id.to_string(), err));
                }
            }
        }

        Err(ExecutionError::AllModelsFailed { errors })
    }

    /// One call with the per-arm timeout applied.
    async fn call_one(
        &self,
        client: &dyn CompletionClient,
        model_id: &str,
        prompt: &str,
        schema: Option<&serde_json::Value>,
    ) -> Result<CompletionOutput, CallError> {
        match tokio::time::timeout(self.timeout, client.call(model_id, prompt, schema)).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}
