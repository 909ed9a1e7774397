//! 改写服务核心实现
//!
//! [`RewriteService`] 串起整条流水线：提取 → 分批 → 构造提示词 → 查缓存 → 带重试调用生成器 → 注入。
//!
//! ## 失败处理
//!
//! - 文档级错误（空文档、过大、格式错误）不会让运行失败，返回原文档并计入统计
//! - 单个片段失败时保留原文，错误计数加一，并按类别记录跳过原因
//! - 只有无法构造生成客户端时才向调用方返回错误
//!
//! 统计在每条退出路径上都会补上耗时。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let service = RewriteService::new(provider, cache, RetryPolicy::default());
//! let outcome = service.process(&html, &ProcessingConfig::default()).await?;
//! println!("{}", outcome.stats);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, Notify};

use crate::rewrite::error::helpers::log_error;
use crate::rewrite::error::{DocumentError, ErrorCategory, RewriteResult};
use crate::rewrite::llm::retry::send_with_retry;
use crate::rewrite::llm::{
    ChatMessage, GenerationParams, GeneratorProvider, RetryPolicy, TextGenerator,
};
use crate::rewrite::models::{Fragment, ProcessingConfig, ProcessingOutcome, ProcessingStats};
use crate::rewrite::pipeline::batch::BatchPlan;
use crate::rewrite::pipeline::extractor::extract;
use crate::rewrite::pipeline::injector::inject_with_report;
use crate::rewrite::pipeline::prompts::build_messages;
use crate::rewrite::storage::{CacheEntry, CacheKey, ResponseCache};

/// 运行级取消标记
///
/// 克隆后共享同一状态。取消后尚未完成的片段保留原文。
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// 等待取消
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// 单个片段的处理结果
#[derive(Debug)]
enum FragmentOutcome {
    Rewritten {
        text: String,
        tokens_in: usize,
        tokens_out: usize,
        cache_hit: bool,
        retries: usize,
    },
    Failed {
        category: ErrorCategory,
        tokens_in: usize,
        retries: usize,
    },
    Cancelled,
}

/// 一次生成请求的上下文
struct Request<'a> {
    index: usize,
    generator: &'a dyn TextGenerator,
    fragment: &'a Fragment,
    messages: &'a [ChatMessage],
    params: &'a GenerationParams,
}

/// 改写服务
///
/// 缓存和生成客户端的提供者都由调用方注入，测试可以替换为内存实现或桩。
pub struct RewriteService {
    provider: Arc<dyn GeneratorProvider>,
    cache: Arc<dyn ResponseCache>,
    policy: RetryPolicy,
    request_timeout: Option<Duration>,
    /// 每个缓存键一把锁，相同请求并发时只调用一次上游
    key_locks: DashMap<CacheKey, Arc<Mutex<()>>>,
}

impl RewriteService {
    pub fn new(
        provider: Arc<dyn GeneratorProvider>,
        cache: Arc<dyn ResponseCache>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            cache,
            policy,
            request_timeout: None,
            key_locks: DashMap::new(),
        }
    }

    /// 设置单次请求的超时
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn cache(&self) -> &Arc<dyn ResponseCache> {
        &self.cache
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 处理文档
    pub async fn process(
        &self,
        document: &str,
        config: &ProcessingConfig,
    ) -> RewriteResult<ProcessingOutcome> {
        self.process_with_cancel(document, config, &CancelFlag::new())
            .await
    }

    /// 处理文档，可通过 `cancel` 提前结束
    pub async fn process_with_cancel(
        &self,
        document: &str,
        config: &ProcessingConfig,
        cancel: &CancelFlag,
    ) -> RewriteResult<ProcessingOutcome> {
        let started = Instant::now();
        let mut stats = ProcessingStats::default();

        tracing::info!(
            task = %config.task,
            backend = %config.backend,
            model = %config.model,
            "开始处理文档（{} 字节）",
            document.len()
        );

        let result = self.run(document, config, cancel, &mut stats).await;
        stats.duration = started.elapsed();

        match result {
            Ok(html) => {
                tracing::info!("处理完成: {}", stats);
                Ok(ProcessingOutcome { html, stats })
            }
            Err(e) => {
                log_error(&e);
                tracing::info!("处理中止: {}", stats);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        document: &str,
        config: &ProcessingConfig,
        cancel: &CancelFlag,
        stats: &mut ProcessingStats,
    ) -> RewriteResult<String> {
        config.validate()?;

        let mut fragments = match extract(document, config.min_text_length) {
            Ok(fragments) => fragments,
            Err(DocumentError::EmptyInput) => {
                tracing::warn!("文档为空，原样返回");
                stats.warnings += 1;
                return Ok(document.to_string());
            }
            Err(e) => {
                tracing::error!("无法提取文本: {}", e);
                stats.errors += 1;
                return Ok(document.to_string());
            }
        };

        stats.fragments_seen = fragments.len();
        if fragments.is_empty() {
            tracing::info!("没有需要处理的文本");
            return Ok(document.to_string());
        }

        let generator = self.provider.generator(config.backend, &config.model)?;
        let mut params = GenerationParams::from_config(config);
        if let Some(timeout) = self.request_timeout {
            params = params.with_timeout(timeout);
        }

        let plan = BatchPlan::new(fragments.len(), config.batch_size);
        let mut processed = 0;

        for batch in plan.batches() {
            if cancel.is_cancelled() {
                break;
            }

            tracing::debug!(
                "处理批次 {}/{}（{} 个片段）",
                batch.index + 1,
                plan.len(),
                batch.len()
            );

            let outcomes: Vec<FragmentOutcome> = {
                let slice = &fragments[batch.range.clone()];
                let base = batch.range.start;
                stream::iter(slice.iter().enumerate().map(|(offset, fragment)| {
                    self.process_fragment(
                        base + offset,
                        generator.as_ref(),
                        fragment,
                        config,
                        &params,
                        cancel,
                    )
                }))
                .buffered(config.concurrency.max(1))
                .collect()
                .await
            };

            for (fragment, outcome) in fragments[batch.range.clone()].iter_mut().zip(outcomes) {
                apply_outcome(fragment, outcome, stats);
            }

            processed = batch.range.end;
            stats.batches += 1;
        }

        if processed < fragments.len() {
            for _ in processed..fragments.len() {
                stats.record_skip(ErrorCategory::Cancelled);
            }
        }
        if stats.skip_reasons.contains_key(&ErrorCategory::Cancelled) {
            tracing::warn!("运行已取消，剩余片段保留原文");
            stats.warnings += 1;
        }

        match inject_with_report(document, &fragments, false) {
            Ok(report) => {
                stats.warnings += report.unresolved.len();
                Ok(report.html)
            }
            Err(e) => {
                tracing::error!("无法写回文档: {}", e);
                stats.errors += 1;
                Ok(document.to_string())
            }
        }
    }

    async fn process_fragment(
        &self,
        index: usize,
        generator: &dyn TextGenerator,
        fragment: &Fragment,
        config: &ProcessingConfig,
        params: &GenerationParams,
        cancel: &CancelFlag,
    ) -> FragmentOutcome {
        if cancel.is_cancelled() {
            return FragmentOutcome::Cancelled;
        }

        let messages = build_messages(fragment, config);
        let request = Request {
            index,
            generator,
            fragment,
            messages: &messages,
            params,
        };

        if !config.use_cache {
            return self.generate(&request, None, cancel).await;
        }

        // 相同请求在并发时串行，后到的直接命中缓存
        let key = CacheKey::new(&messages, generator.model(), params);
        let lock = self.key_lock(&key);
        let outcome = {
            let _guard = lock.lock().await;
            self.generate(&request, Some(&key), cancel).await
        };

        drop(lock);
        self.key_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    async fn generate(
        &self,
        request: &Request<'_>,
        key: Option<&CacheKey>,
        cancel: &CancelFlag,
    ) -> FragmentOutcome {
        let generator = request.generator;

        if let Some(cached) = key.and_then(|key| self.cache.lookup(key)) {
            tracing::debug!(fragment = request.index, "缓存命中");
            return FragmentOutcome::Rewritten {
                text: cached,
                tokens_in: 0,
                tokens_out: 0,
                cache_hit: true,
                retries: 0,
            };
        }

        let tokens_in: usize = request
            .messages
            .iter()
            .map(|message| generator.estimate_tokens(&message.content))
            .sum();

        let report = tokio::select! {
            report = send_with_retry(generator, request.messages, request.params, &self.policy) => report,
            _ = cancel.cancelled() => return FragmentOutcome::Cancelled,
        };
        let retries = report.retries();

        match report.result {
            Ok(response) => {
                if let Some(key) = key {
                    let entry = CacheEntry::new(generator.model(), request.params, response.as_str());
                    self.cache.store(key, entry);
                }
                FragmentOutcome::Rewritten {
                    tokens_out: generator.estimate_tokens(&response),
                    text: response,
                    tokens_in,
                    cache_hit: false,
                    retries,
                }
            }
            Err(e) => {
                tracing::error!(
                    fragment = request.index,
                    address = %request.fragment.address,
                    "处理失败，保留原文: {}",
                    e
                );
                FragmentOutcome::Failed {
                    category: ErrorCategory::from(&e),
                    tokens_in,
                    retries,
                }
            }
        }
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        Arc::clone(self.key_locks.entry(key.clone()).or_default().value())
    }
}

fn apply_outcome(fragment: &mut Fragment, outcome: FragmentOutcome, stats: &mut ProcessingStats) {
    match outcome {
        FragmentOutcome::Rewritten {
            text,
            tokens_in,
            tokens_out,
            cache_hit,
            retries,
        } => {
            fragment.text = text.trim().to_string();
            stats.fragments_rewritten += 1;
            stats.tokens_in += tokens_in;
            stats.tokens_out += tokens_out;
            stats.retries += retries;
            if cache_hit {
                stats.cache_hits += 1;
            }
        }
        FragmentOutcome::Failed {
            category,
            tokens_in,
            retries,
        } => {
            fragment.restore();
            stats.errors += 1;
            stats.tokens_in += tokens_in;
            stats.retries += retries;
            stats.record_skip(category);
        }
        FragmentOutcome::Cancelled => {
            fragment.restore();
            stats.record_skip(ErrorCategory::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::error::{GenerationError, GenerationResult};
    use crate::rewrite::llm::FixedProvider;
    use crate::rewrite::storage::{MemoryCache, NoCache};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// 把 user 消息中冒号后的文本转成大写
    struct Upper {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for Upper {
        async fn send(&self, messages: &[ChatMessage], _: &GenerationParams) -> GenerationResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let user = &messages[1].content;
            let text = user.split_once(": ").map_or(user.as_str(), |(_, t)| t);
            Ok(text.to_uppercase())
        }

        fn model(&self) -> &str {
            "upper"
        }
    }

    struct Denied;

    #[async_trait]
    impl TextGenerator for Denied {
        async fn send(&self, _: &[ChatMessage], _: &GenerationParams) -> GenerationResult<String> {
            Err(GenerationError::AuthenticationFailed("invalid key".to_string()))
        }

        fn model(&self) -> &str {
            "denied"
        }
    }

    fn service(generator: Arc<dyn TextGenerator>, cache: Arc<dyn ResponseCache>) -> RewriteService {
        RewriteService::new(Arc::new(FixedProvider(generator)), cache, RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_rewrites_every_fragment() {
        let upper = Arc::new(Upper { calls: AtomicUsize::new(0) });
        let service = service(upper.clone(), Arc::new(NoCache));

        let outcome = service
            .process("<p>hello there</p><p>second one</p>", &ProcessingConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome.html, "<p>HELLO THERE</p><p>SECOND ONE</p>");
        assert_eq!(outcome.stats.fragments_seen, 2);
        assert_eq!(outcome.stats.fragments_rewritten, 2);
        assert_eq!(outcome.stats.batches, 1);
        assert!(outcome.stats.tokens_in > 0);
        assert_eq!(upper.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_identical_fragments_hit_cache() {
        let upper = Arc::new(Upper { calls: AtomicUsize::new(0) });
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(60), 100));
        let service = service(upper.clone(), cache);
        let config = ProcessingConfig {
            concurrency: 4,
            ..Default::default()
        };

        let outcome = service
            .process("<p>same text</p><p>same text</p><p>same text</p>", &config)
            .await
            .unwrap();

        assert_eq!(upper.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.stats.cache_hits, 2);
        assert_eq!(outcome.html, "<p>SAME TEXT</p><p>SAME TEXT</p><p>SAME TEXT</p>");
        assert!(service.key_locks.is_empty());
    }

    #[tokio::test]
    async fn test_authentication_failure_keeps_original() {
        let service = service(Arc::new(Denied), Arc::new(NoCache));
        let html = "<p>keep me</p>";

        let outcome = service.process(html, &ProcessingConfig::default()).await.unwrap();

        assert_eq!(outcome.html, html);
        assert_eq!(outcome.stats.errors, 1);
        assert_eq!(outcome.stats.retries, 0);
        assert_eq!(
            outcome.stats.skip_reasons.get(&ErrorCategory::AuthenticationFailed),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_keeps_original_text() {
        let service = service(
            Arc::new(Upper { calls: AtomicUsize::new(0) }),
            Arc::new(NoCache),
        );
        let cancel = CancelFlag::new();
        cancel.cancel();

        let html = "<p>first one</p><p>second one</p>";
        let outcome = service
            .process_with_cancel(html, &ProcessingConfig::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.html, html);
        assert_eq!(outcome.stats.fragments_skipped, 2);
        assert_eq!(outcome.stats.warnings, 1);
        assert_eq!(outcome.stats.batches, 0);
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let cancel = CancelFlag::new();
        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { cancel.cancelled().await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        waiter.await.unwrap();
        assert!(cancel.is_cancelled());
    }
}
