//! 文档模型
//!
//! 片段、处理配置以及处理结果等值类型。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use super::config::constants;
use super::error::{ErrorCategory, RewriteError, RewriteResult};

/// 提取出的文本片段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// 当前文本，处理成功后被替换为改写结果
    pub text: String,
    /// 提取时的原始文本（已去除首尾空白）
    pub original: String,
    /// 所在元素的结构化地址
    pub address: String,
    /// 是否为从右到左的文本
    pub is_rtl: bool,
}

impl Fragment {
    pub fn new(text: impl Into<String>, address: impl Into<String>, is_rtl: bool) -> Self {
        let text = text.into();
        Self {
            original: text.clone(),
            text,
            address: address.into(),
            is_rtl,
        }
    }

    /// 文本是否已被改写
    pub fn is_rewritten(&self) -> bool {
        self.text != self.original
    }

    /// 恢复为原始文本
    pub fn restore(&mut self) {
        self.text.clone_from(&self.original);
    }
}

/// 处理任务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// 保持原意改写
    #[default]
    Rewrite,
    /// 摘要
    Summarize,
    /// 按自定义指令处理
    Custom,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Rewrite => write!(f, "rewrite"),
            Task::Summarize => write!(f, "summarize"),
            Task::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for Task {
    type Err = RewriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rewrite" | "paraphrase" => Ok(Task::Rewrite),
            "summarize" | "summary" => Ok(Task::Summarize),
            "custom" => Ok(Task::Custom),
            other => Err(RewriteError::ConfigError(format!(
                "不支持的任务 '{}'，可选: rewrite, summarize, custom",
                other
            ))),
        }
    }
}

/// 生成后端类型，由配置显式指定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    OpenAi,
    Gemini,
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::OpenAi => write!(f, "openai"),
            BackendKind::Gemini => write!(f, "gemini"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = RewriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(BackendKind::OpenAi),
            "gemini" => Ok(BackendKind::Gemini),
            "local" | "ollama" => Ok(BackendKind::Local),
            other => Err(RewriteError::ConfigError(format!(
                "不支持的后端 '{}'，可选: openai, gemini, local",
                other
            ))),
        }
    }
}

/// 单次运行的处理配置，运行期间不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub task: Task,
    /// 目标语言标签
    pub language: String,
    pub model: String,
    pub backend: BackendKind,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    /// 自定义任务的指令
    pub custom_prompt: Option<String>,
    pub use_cache: bool,
    /// 小于该字符数的文本不处理
    pub min_text_length: usize,
    /// 同一批次内同时处理的片段数
    pub concurrency: usize,
    pub batch_size: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            task: Task::Rewrite,
            language: constants::DEFAULT_LANGUAGE.to_string(),
            model: constants::DEFAULT_MODEL.to_string(),
            backend: BackendKind::OpenAi,
            temperature: constants::DEFAULT_TEMPERATURE,
            max_tokens: constants::DEFAULT_MAX_TOKENS,
            top_p: None,
            top_k: None,
            custom_prompt: None,
            use_cache: true,
            min_text_length: constants::DEFAULT_MIN_TEXT_LENGTH,
            concurrency: 1,
            batch_size: constants::DEFAULT_BATCH_SIZE,
        }
    }
}

impl ProcessingConfig {
    /// 验证配置
    pub fn validate(&self) -> RewriteResult<()> {
        if self.model.trim().is_empty() {
            return Err(RewriteError::ConfigError("模型名称不能为空".to_string()));
        }

        if self.language.trim().is_empty() {
            return Err(RewriteError::ConfigError("目标语言不能为空".to_string()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RewriteError::ConfigError(format!(
                "温度必须在 0 到 2 之间: {}",
                self.temperature
            )));
        }

        if self.max_tokens == 0 {
            return Err(RewriteError::ConfigError("最大输出长度不能为0".to_string()));
        }

        if let Some(top_p) = self.top_p {
            if !(top_p > 0.0 && top_p <= 1.0) {
                return Err(RewriteError::ConfigError(format!(
                    "top_p 必须在 (0, 1] 区间内: {}",
                    top_p
                )));
            }
        }

        if self.top_k == Some(0) {
            return Err(RewriteError::ConfigError("top_k 不能为0".to_string()));
        }

        if self.batch_size == 0 {
            return Err(RewriteError::ConfigError("批次大小不能为0".to_string()));
        }

        if self.concurrency == 0 {
            return Err(RewriteError::ConfigError("并发数不能为0".to_string()));
        }

        Ok(())
    }
}

/// 处理统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub fragments_seen: usize,
    pub fragments_rewritten: usize,
    pub fragments_skipped: usize,
    pub tokens_in: usize,
    pub tokens_out: usize,
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub errors: usize,
    pub warnings: usize,
    pub cache_hits: usize,
    pub retries: usize,
    pub batches: usize,
    /// 按错误类别汇总的跳过原因
    pub skip_reasons: BTreeMap<ErrorCategory, usize>,
}

impl ProcessingStats {
    /// 记录一个被跳过的片段
    pub fn record_skip(&mut self, reason: ErrorCategory) {
        self.fragments_skipped += 1;
        *self.skip_reasons.entry(reason).or_insert(0) += 1;
    }

    /// 合并另一份统计（目录模式下汇总多个文件）
    pub fn merge(&mut self, other: &ProcessingStats) {
        self.fragments_seen += other.fragments_seen;
        self.fragments_rewritten += other.fragments_rewritten;
        self.fragments_skipped += other.fragments_skipped;
        self.tokens_in += other.tokens_in;
        self.tokens_out += other.tokens_out;
        self.duration += other.duration;
        self.errors += other.errors;
        self.warnings += other.warnings;
        self.cache_hits += other.cache_hits;
        self.retries += other.retries;
        self.batches += other.batches;
        for (reason, count) in &other.skip_reasons {
            *self.skip_reasons.entry(*reason).or_insert(0) += count;
        }
    }

    /// 成功率（百分比）
    pub fn success_rate(&self) -> f64 {
        if self.fragments_seen == 0 {
            100.0
        } else {
            self.fragments_rewritten as f64 / self.fragments_seen as f64 * 100.0
        }
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl fmt::Display for ProcessingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "片段 {} 个，改写 {} 个，跳过 {} 个，输入 {} tokens，输出 {} tokens，缓存命中 {} 次，错误 {} 个，警告 {} 个，耗时 {:.2}s",
            self.fragments_seen,
            self.fragments_rewritten,
            self.fragments_skipped,
            self.tokens_in,
            self.tokens_out,
            self.cache_hits,
            self.errors,
            self.warnings,
            self.duration.as_secs_f64()
        )
    }
}

/// 处理结果
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    pub html: String,
    pub stats: ProcessingStats,
}
