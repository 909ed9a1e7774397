// 集成测试公共模块
//
// 提供桩生成器、服务构建器和测试文档

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use llm_html_rewriter::rewrite::error::{GenerationError, GenerationResult};
use llm_html_rewriter::rewrite::llm::{
    ChatMessage, FixedProvider, GenerationParams, RetryPolicy, TextGenerator,
};
use llm_html_rewriter::rewrite::storage::{MemoryCache, NoCache, ResponseCache};
use llm_html_rewriter::{CancelFlag, RewriteService};

/// 取出 user 消息中任务前缀之后的文本
pub fn fragment_text(messages: &[ChatMessage]) -> String {
    let user = messages
        .iter()
        .find(|message| message.role == "user")
        .map(|message| message.content.as_str())
        .unwrap_or_default();
    user.split_once(": ")
        .map_or(user, |(_, text)| text)
        .to_string()
}

/// 把片段文本转成大写，并记录调用次数
#[derive(Default)]
pub struct UppercaseGenerator {
    calls: AtomicUsize,
}

impl UppercaseGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for UppercaseGenerator {
    async fn send(&self, messages: &[ChatMessage], _: &GenerationParams) -> GenerationResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(fragment_text(messages).to_uppercase())
    }

    fn model(&self) -> &str {
        "uppercase"
    }
}

/// 按预设顺序返回结果，并记录每次调用的时刻；预设用完后返回大写文本
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<GenerationError>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedGenerator {
    /// 前几次调用依次返回这些错误
    pub fn failing_with(errors: Vec<GenerationError>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(errors.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// 每次都返回速率限制
    pub fn always_rate_limited(times: usize) -> Arc<Self> {
        Self::failing_with(
            (0..times)
                .map(|_| GenerationError::RateLimited("429 Too Many Requests".to_string()))
                .collect(),
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 相邻两次调用之间的间隔
    pub fn gaps(&self) -> Vec<Duration> {
        let calls = self.calls.lock().unwrap();
        calls.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn send(&self, messages: &[ChatMessage], _: &GenerationParams) -> GenerationResult<String> {
        self.calls.lock().unwrap().push(Instant::now());
        match self.script.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(fragment_text(messages).to_uppercase()),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// 第一次调用时触发取消，模拟运行中途收到中断
pub struct CancellingGenerator {
    cancel: CancelFlag,
    calls: AtomicUsize,
}

impl CancellingGenerator {
    pub fn new(cancel: CancelFlag) -> Arc<Self> {
        Arc::new(Self {
            cancel,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for CancellingGenerator {
    async fn send(&self, messages: &[ChatMessage], _: &GenerationParams) -> GenerationResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Ok(fragment_text(messages).to_uppercase())
    }

    fn model(&self) -> &str {
        "cancelling"
    }
}

/// 测试环境构建器
pub struct TestEnvironment {
    cache: Arc<dyn ResponseCache>,
    policy: RetryPolicy,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(NoCache),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_memory_cache(mut self) -> Self {
        self.cache = Arc::new(MemoryCache::new(Duration::from_secs(300), 100));
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn service(self, generator: Arc<dyn TextGenerator>) -> RewriteService {
        RewriteService::new(Arc::new(FixedProvider(generator)), self.cache, self.policy)
    }
}

/// 测试文档
pub struct TestDocuments;

impl TestDocuments {
    pub fn rtl_mixed() -> &'static str {
        r#"<html><body><p dir="rtl">שלום עולם</p><p>Hello</p></body></html>"#
    }

    pub fn article() -> &'static str {
        r#"<!DOCTYPE html>
<html lang="en">
<head><title>Release notes</title><style>p { color: red; }</style></head>
<body>
  <main>
    <h1 id="title">What changed</h1>
    <p class="lead">The cache now expires old entries.</p>
    <ul><li>Faster startup</li><li>Fewer retries</li></ul>
    <pre><code>let x = 1;</code></pre>
  </main>
</body>
</html>"#
    }

    /// `count` 个互不相同的段落
    pub fn paragraphs(count: usize) -> String {
        let body: String = (0..count)
            .map(|i| format!("<p>paragraph number {}</p>", i))
            .collect();
        format!("<html><body>{}</body></html>", body)
    }
}
