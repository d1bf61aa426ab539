//! 推理重试策略
//!
//! 第 1 次尝试无延迟，第 k 次 (k ≥ 2) 之前等待 `initial_delay × exp_base^(k-2)`；
//! 只有可重试类别（配置的 HTTP 状态，可选超时）会消耗重试预算，其他错误立即返回。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RetrySection;
use crate::llm::{InferenceRequest, InferenceResponse, LlmClient, LlmError};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次）
    pub attempts: u32,
    pub initial_delay: Duration,
    pub exp_base: u32,
    pub retryable_status: Vec<u16>,
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_secs(1),
            exp_base: 7,
            retryable_status: vec![429, 500, 503, 504],
            retry_on_timeout: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(section: &RetrySection) -> Self {
        Self {
            attempts: section.attempts.max(1),
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            exp_base: section.exp_base,
            retryable_status: section.retryable_status.clone(),
            retry_on_timeout: section.retry_on_timeout,
        }
    }

    /// 第 attempt 次尝试（从 1 开始）之前的等待时间
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.exp_base.saturating_pow(attempt - 2);
        self.initial_delay.saturating_mul(factor)
    }

    pub fn is_retryable(&self, err: &LlmError) -> bool {
        match err {
            LlmError::Status { status, .. } => self.retryable_status.contains(status),
            LlmError::Timeout => self.retry_on_timeout,
            _ => false,
        }
    }
}

/// 给任意 LlmClient 套上重试策略
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, LlmError> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.inner.complete(request).await {
                Ok(response) => {
                    if attempt > 1 {
                        tracing::info!(handler = %request.handler, attempt, "inference succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) if self.policy.is_retryable(&e) => {
                    if attempt >= attempts {
                        tracing::warn!(handler = %request.handler, attempts, error = %e, "retry budget exhausted");
                        return Err(LlmError::Exhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }
                    tracing::warn!(
                        handler = %request.handler,
                        attempt,
                        max_attempts = attempts,
                        next_delay_ms = self.policy.delay_before(attempt + 1).as_millis() as u64,
                        error = %e,
                        "transient inference failure, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ContextSnapshot;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// 前 failures 次返回 503，之后成功；记录每次调用时刻
    struct Flaky {
        failures: usize,
        error: LlmError,
        calls: Mutex<Vec<Instant>>,
    }

    impl Flaky {
        fn new(failures: usize, error: LlmError) -> Self {
            Self {
                failures,
                error,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn gaps(&self) -> Vec<Duration> {
            let calls = self.calls.lock().unwrap();
            calls.windows(2).map(|w| w[1] - w[0]).collect()
        }

        fn count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for Flaky {
        async fn complete(&self, _request: &InferenceRequest) -> Result<InferenceResponse, LlmError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len()
            };
            if n <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(InferenceResponse::Final("ok".to_string()))
            }
        }
    }

    fn request() -> InferenceRequest {
        InferenceRequest {
            handler: "test".to_string(),
            instruction: String::new(),
            state: ContextSnapshot::default(),
            history: Vec::new(),
            tools: Vec::new(),
        }
    }

    fn unavailable() -> LlmError {
        LlmError::Status {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=5).map(|k| policy.delay_before(k).as_secs()).collect();
        assert_eq!(delays, vec![0, 1, 7, 49, 343]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_fifth_attempt_with_backoff() {
        let flaky = Arc::new(Flaky::new(4, unavailable()));
        let client = RetryingLlmClient::new(flaky.clone(), RetryPolicy::default());

        let response = client.complete(&request()).await.unwrap();
        assert_eq!(response, InferenceResponse::Final("ok".to_string()));
        assert_eq!(flaky.count(), 5);
        assert_eq!(
            flaky.gaps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(7),
                Duration::from_secs(49),
                Duration::from_secs(343),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifth_failure_is_terminal_without_sixth_attempt() {
        let flaky = Arc::new(Flaky::new(10, unavailable()));
        let client = RetryingLlmClient::new(flaky.clone(), RetryPolicy::default());

        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Exhausted { attempts: 5, .. }));
        assert_eq!(flaky.count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_status_returns_immediately() {
        let flaky = Arc::new(Flaky::new(
            10,
            LlmError::Status {
                status: 400,
                message: "bad request".to_string(),
            },
        ));
        let client = RetryingLlmClient::new(flaky.clone(), RetryPolicy::default());

        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Status { status: 400, .. }));
        assert_eq!(flaky.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retried_only_when_enabled() {
        let flaky = Arc::new(Flaky::new(1, LlmError::Timeout));
        let client = RetryingLlmClient::new(flaky.clone(), RetryPolicy::default());
        assert!(matches!(client.complete(&request()).await, Err(LlmError::Timeout)));

        let flaky = Arc::new(Flaky::new(1, LlmError::Timeout));
        let policy = RetryPolicy {
            retry_on_timeout: true,
            ..RetryPolicy::default()
        };
        let client = RetryingLlmClient::new(flaky.clone(), policy);
        assert!(client.complete(&request()).await.is_ok());
        assert_eq!(flaky.count(), 2);
    }
}
