//! 文本生成能力
//!
//! 流水线只依赖 [`TextGenerator`]：发送一组消息，返回文本，失败时给出分类后的错误。
//! 具体的 HTTP 后端在 [`backend`] 中按配置显式选择。

pub mod backend;
pub mod gemini;
pub mod local;
pub mod openai;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{GenerationResult, RewriteResult};
use super::models::{BackendKind, ProcessingConfig};

pub use backend::{Backend, HttpBackends};
pub use retry::{AttemptOutcome, RetryPolicy, RetryReport};

/// 对话消息
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// 生成参数
///
/// `timeout` 只影响传输，不参与缓存键计算。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl GenerationParams {
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            top_k: config.top_k,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from_config(&ProcessingConfig::default())
    }
}

/// 文本生成能力
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// 发送消息并返回生成的文本
    async fn send(&self, messages: &[ChatMessage], params: &GenerationParams)
        -> GenerationResult<String>;

    /// 模型名称
    fn model(&self) -> &str;

    /// 估算 token 数，仅用于统计
    fn estimate_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// 粗略估算：约每 4 个字符一个 token，非空文本至少为 1
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        0
    } else {
        chars.div_ceil(4)
    }
}

/// 生成客户端的提供者
///
/// 构造失败（例如缺少 API 密钥）是唯一会让整次运行失败的错误。
pub trait GeneratorProvider: Send + Sync {
    fn generator(&self, backend: BackendKind, model: &str) -> RewriteResult<Arc<dyn TextGenerator>>;
}

/// 总是返回同一个生成器，便于嵌入和测试
pub struct FixedProvider(pub Arc<dyn TextGenerator>);

impl GeneratorProvider for FixedProvider {
    fn generator(&self, _backend: BackendKind, _model: &str) -> RewriteResult<Arc<dyn TextGenerator>> {
        Ok(Arc::clone(&self.0))
    }
}
