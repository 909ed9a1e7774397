//! 重试与退避
//!
//! 每次尝试返回一个类型化的结果：成功、可重试或致命。循环次数有上限，
//! 两次尝试之间等待 `initial_delay * backoff_factor^attempt`，不超过 `max_delay`。

use std::future::Future;
use std::time::Duration;

use super::{ChatMessage, GenerationParams, TextGenerator};
use crate::rewrite::config::constants;
use crate::rewrite::error::{GenerationError, GenerationResult};

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 包含第一次在内的最大尝试次数
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: constants::MAX_RETRY_ATTEMPTS,
            initial_delay: constants::RETRY_INITIAL_DELAY,
            backoff_factor: constants::RETRY_BACKOFF_FACTOR,
            max_delay: constants::RETRY_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次（从 0 开始）失败后的等待时间
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// 单次尝试的结果
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    Retryable(GenerationError),
    Fatal(GenerationError),
}

impl<T> From<GenerationResult<T>> for AttemptOutcome<T> {
    fn from(result: GenerationResult<T>) -> Self {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(error) if error.is_retryable() => AttemptOutcome::Retryable(error),
            Err(error) => AttemptOutcome::Fatal(error),
        }
    }
}

/// 重试循环的最终结果
#[derive(Debug)]
pub struct RetryReport<T> {
    pub result: GenerationResult<T>,
    /// 实际进行的尝试次数
    pub attempts: usize,
}

impl<T> RetryReport<T> {
    pub fn retries(&self) -> usize {
        self.attempts.saturating_sub(1)
    }
}

/// 在重试策略下执行操作
///
/// `operation` 接收从 0 开始的尝试序号。致命错误立即返回，不消耗重试次数；
/// 次数耗尽时返回包装了最后一次错误的 `RetriesExhausted`。
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> RetryReport<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 0..max_attempts {
        match operation(attempt).await {
            AttemptOutcome::Success(value) => {
                return RetryReport {
                    result: Ok(value),
                    attempts: attempt + 1,
                }
            }
            AttemptOutcome::Fatal(error) => {
                tracing::debug!(attempt, "不可重试的错误: {}", error);
                return RetryReport {
                    result: Err(error),
                    attempts: attempt + 1,
                };
            }
            AttemptOutcome::Retryable(error) => {
                if attempt + 1 == max_attempts {
                    return RetryReport {
                        result: Err(GenerationError::RetriesExhausted {
                            attempts: max_attempts,
                            last: Box::new(error),
                        }),
                        attempts: max_attempts,
                    };
                }

                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "请求失败，{:.1}秒后进行第 {} 次重试: {}",
                    delay.as_secs_f64(),
                    attempt + 2,
                    error
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    // max_attempts >= 1，循环总会返回
    RetryReport {
        result: Err(GenerationError::TransportError("未进行任何尝试".to_string())),
        attempts: 0,
    }
}

/// 带重试地调用生成器
pub async fn send_with_retry(
    generator: &dyn TextGenerator,
    messages: &[ChatMessage],
    params: &GenerationParams,
    policy: &RetryPolicy,
) -> RetryReport<String> {
    with_retry(policy, |_| async move {
        AttemptOutcome::from(generator.send(messages, params).await)
    })
    .await
}

/// 根据 HTTP 状态码和响应正文分类错误
pub fn classify_status(status: u16, body: &str) -> GenerationError {
    let detail = format!("HTTP {}: {}", status, truncate(body, 200));
    match status {
        429 => GenerationError::RateLimited(detail),
        401 | 403 => GenerationError::AuthenticationFailed(detail),
        404 => GenerationError::ModelUnavailable(detail),
        _ => match classify_message(body) {
            GenerationError::TransportError(_) => GenerationError::TransportError(detail),
            classified => classified,
        },
    }
}

/// 根据错误文本分类
pub fn classify_message(message: &str) -> GenerationError {
    let lowered = message.to_lowercase();
    if lowered.contains("rate limit") || lowered.contains("rate_limit") || lowered.contains("too many requests") {
        GenerationError::RateLimited(message.to_string())
    } else if lowered.contains("authentication") || lowered.contains("api key") || lowered.contains("unauthorized") {
        GenerationError::AuthenticationFailed(message.to_string())
    } else if lowered.contains("model") && (lowered.contains("not found") || lowered.contains("does not exist")) {
        GenerationError::ModelUnavailable(message.to_string())
    } else {
        GenerationError::TransportError(message.to_string())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
