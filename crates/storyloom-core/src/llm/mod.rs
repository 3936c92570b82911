//! LLM provider abstraction and gateway.
//!
//! Provides a trait-based abstraction for LLM providers (Anthropic, OpenAI,
//! Ollama) with typed responses and token usage tracking, plus the
//! [`LlmGateway`] wrapper that enforces deadlines and bounded retries.

pub mod anthropic;
pub mod extract;
pub mod factory;
pub mod openai_compat;
pub mod pricing;

use crate::error::LlmError;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Token usage information from an LLM completion.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the input/prompt.
    pub input_tokens: u32,
    /// Number of tokens in the output/completion.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Accumulate token counts from another usage record (e.g. across retries).
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Response from an LLM completion request.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The generated text content.
    pub text: String,
    /// Token usage for this completion.
    pub usage: TokenUsage,
    /// The model that produced this response.
    pub model: String,
}

/// Parameters controlling LLM generation behavior.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 = deterministic, 1.0+ = creative).
    pub temperature: f32,
    /// Optional system prompt override. If `Some`, replaces the caller's system prompt.
    pub system_prompt: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
            system_prompt: None,
        }
    }
}

/// Trait abstracting all LLM provider operations.
///
/// Implementations include `OpenAiCompatProvider` (for OpenAI and Ollama)
/// and `AnthropicProvider`. The trait is object-safe for use as `Box<dyn LlmProvider>`.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the display name of this provider (e.g., "openai", "anthropic", "ollama").
    fn name(&self) -> &str;

    /// Send a completion request to the LLM.
    ///
    /// If `params.system_prompt` is `Some`, it overrides the `system` parameter.
    async fn complete(
        &self,
        system: &str,
        user_message: &str,
        params: &GenerationParams,
    ) -> Result<LlmResponse, LlmError>;

    /// Check if the provider is reachable and configured correctly.
    async fn health_check(&self) -> Result<(), LlmError>;
}

/// Gateway wrapping a provider with a wall-clock deadline and bounded retries.
///
/// The gateway is stateless and cheap to clone. Transient transport errors
/// retry with exponential backoff plus jitter; rate limits honor the
/// server-provided delay. Concurrency is not limited here; the orchestrator
/// caps in-flight stories.
#[derive(Clone)]
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
    max_attempts: u32,
}

impl std::fmt::Debug for LlmGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGateway")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl LlmGateway {
    /// Create a gateway around a provider.
    ///
    /// `model` is the identifier the provider was constructed with; the
    /// gateway records it for cost accounting.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: String,
        timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            provider,
            model,
            timeout,
            max_attempts: max_attempts.max(1),
        }
    }

    /// The provider's display name.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// The model identifier this gateway routes to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Complete a prompt, retrying transient failures within the attempt budget.
    pub async fn complete(
        &self,
        system: &str,
        user_message: &str,
        params: &GenerationParams,
    ) -> Result<LlmResponse, LlmError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let result = tokio::time::timeout(
                self.timeout,
                self.provider.complete(system, user_message, params),
            )
            .await
            .unwrap_or(Err(LlmError::Timeout {
                seconds: self.timeout.as_secs(),
            }));

            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = retry_delay(&err, attempt);
                    tracing::warn!(
                        provider = %self.provider.name(),
                        model = %self.model,
                        attempt = attempt,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "transient LLM error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Compute the delay before the next attempt.
///
/// Rate limits honor the server-provided delay; other transient errors use
/// exponential backoff starting at 2s with up to 1s of jitter, capped at 60s.
fn retry_delay(err: &LlmError, attempt: u32) -> Duration {
    if let LlmError::RateLimited { retry_after_secs } = err {
        return Duration::from_secs(*retry_after_secs);
    }
    let base = 2u64.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let jitter_ms = rand::thread_rng().gen_range(0..1000);
    Duration::from_millis(base.min(60).saturating_mul(1000) + jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait::async_trait]
    impl LlmProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _system: &str,
            _user_message: &str,
            _params: &GenerationParams,
        ) -> Result<LlmResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(LlmError::RateLimited { retry_after_secs: 0 })
            } else {
                Ok(LlmResponse {
                    text: "ok".to_string(),
                    usage: TokenUsage {
                        input_tokens: 10,
                        output_tokens: 5,
                    },
                    model: "test-model".to_string(),
                })
            }
        }

        async fn health_check(&self) -> Result<(), LlmError> {
            Ok(())
        }
    }

    struct SlowProvider;

    #[async_trait::async_trait]
    impl LlmProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(
            &self,
            _system: &str,
            _user_message: &str,
            _params: &GenerationParams,
        ) -> Result<LlmResponse, LlmError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("timeout should fire first")
        }

        async fn health_check(&self) -> Result<(), LlmError> {
            Ok(())
        }
    }

    struct MalformedProvider;

    #[async_trait::async_trait]
    impl LlmProvider for MalformedProvider {
        fn name(&self) -> &str {
            "malformed"
        }

        async fn complete(
            &self,
            _system: &str,
            _user_message: &str,
            _params: &GenerationParams,
        ) -> Result<LlmResponse, LlmError> {
            Err(LlmError::Parse("garbage".to_string()))
        }

        async fn health_check(&self) -> Result<(), LlmError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let gateway = LlmGateway::new(
            provider.clone(),
            "test-model".into(),
            Duration::from_secs(5),
            3,
        );

        let response = gateway
            .complete("sys", "user", &GenerationParams::default())
            .await
            .expect("complete");
        assert_eq!(response.text, "ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempt_budget() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
            fail_first: 10,
        });
        let gateway = LlmGateway::new(
            provider.clone(),
            "test-model".into(),
            Duration::from_secs(5),
            3,
        );

        let err = gateway
            .complete("sys", "user", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_produces_timeout_error() {
        let gateway = LlmGateway::new(Arc::new(SlowProvider), "m".into(), Duration::from_secs(1), 1);
        let err = gateway
            .complete("sys", "user", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout { seconds: 1 }));
    }

    #[tokio::test]
    async fn malformed_is_not_retried() {
        let gateway = LlmGateway::new(
            Arc::new(MalformedProvider),
            "m".into(),
            Duration::from_secs(5),
            3,
        );
        let err = gateway
            .complete("sys", "user", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }

    #[test]
    fn retry_delay_honors_rate_limit_hint() {
        let delay = retry_delay(
            &LlmError::RateLimited {
                retry_after_secs: 42,
            },
            1,
        );
        assert_eq!(delay, Duration::from_secs(42));
    }

    #[test]
    fn retry_delay_backs_off() {
        let d1 = retry_delay(&LlmError::Timeout { seconds: 1 }, 1);
        let d3 = retry_delay(&LlmError::Timeout { seconds: 1 }, 3);
        assert!(d1 >= Duration::from_secs(2));
        assert!(d3 >= Duration::from_secs(8));
        assert!(d3 <= Duration::from_secs(61));
    }

    #[test]
    fn token_usage_accumulates() {
        let mut usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 20,
        };
        usage.accumulate(&TokenUsage {
            input_tokens: 5,
            output_tokens: 7,
        });
        assert_eq!(usage.input_tokens, 15);
        assert_eq!(usage.output_tokens, 27);
    }
}
