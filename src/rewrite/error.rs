//! 改写模块统一错误处理
//!
//! 错误分三层：文档级（提取/注入）、生成级（网络调用）以及运行级（配置、缓存）。
//! 文档级和生成级错误在流水线内部就地恢复并计入统计，只有无法构造生成客户端时才会向调用方返回错误。

use std::fmt;

use thiserror::Error;

/// 文档级错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// 文档为空或过小
    #[error("文档为空或过小")]
    EmptyInput,

    /// 文档超过大小上限
    #[error("文档过大: {size} 字节（上限 {max} 字节）")]
    TooLarge { size: usize, max: usize },

    /// 清理后仍无法解析
    #[error("文档格式错误: {reason}（片段: {excerpt}）")]
    MalformedInput { reason: String, excerpt: String },

    /// 严格模式下无法定位片段
    #[error("找不到地址对应的节点: {address}")]
    NodeNotFound { address: String },

    /// 地址无法解析
    #[error("无效的地址 '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// 生成调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// 速率限制
    #[error("请求速率过快，已达到限制: {0}")]
    RateLimited(String),

    /// 认证失败
    #[error("认证失败: {0}")]
    AuthenticationFailed(String),

    /// 模型不可用
    #[error("模型不可用: {0}")]
    ModelUnavailable(String),

    /// 其他传输错误
    #[error("传输错误: {0}")]
    TransportError(String),

    /// 重试次数耗尽
    #[error("经 {attempts} 次尝试后仍然失败: {last}")]
    RetriesExhausted {
        attempts: usize,
        last: Box<GenerationError>,
    },
}

impl GenerationError {
    /// 是否值得重试（速率限制和一般传输错误）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited(_) | GenerationError::TransportError(_)
        )
    }

    /// 重试耗尽时取出最后一次的错误
    pub fn root_cause(&self) -> &GenerationError {
        match self {
            GenerationError::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

/// 运行级错误
#[derive(Error, Debug, Clone)]
pub enum RewriteError {
    /// 文档错误
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// 生成错误
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 缓存错误
    #[error("缓存错误: {0}")]
    CacheError(String),

    /// 无法构造生成客户端
    #[error("无法创建生成客户端: {0}")]
    ClientUnavailable(String),

    /// 运行已取消
    #[error("运行已取消")]
    Cancelled,

    /// IO 错误
    #[error("IO错误: {0}")]
    IoError(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    InternalError(String),
}

impl RewriteError {
    /// 检查错误是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            RewriteError::Generation(e) => e.is_retryable(),
            RewriteError::IoError(_) => true,
            _ => false,
        }
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RewriteError::Document(DocumentError::EmptyInput) => ErrorSeverity::Warning,
            RewriteError::Document(DocumentError::NodeNotFound { .. }) => ErrorSeverity::Warning,
            RewriteError::Document(_) => ErrorSeverity::Error,
            RewriteError::Generation(GenerationError::RateLimited(_)) => ErrorSeverity::Warning,
            RewriteError::Generation(_) => ErrorSeverity::Error,
            RewriteError::ConfigError(_) => ErrorSeverity::Critical,
            RewriteError::CacheError(_) => ErrorSeverity::Warning,
            RewriteError::ClientUnavailable(_) => ErrorSeverity::Critical,
            RewriteError::Cancelled => ErrorSeverity::Info,
            RewriteError::IoError(_) => ErrorSeverity::Error,
            RewriteError::InternalError(_) => ErrorSeverity::Critical,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            RewriteError::Document(e) => ErrorCategory::from(e),
            RewriteError::Generation(e) => ErrorCategory::from(e),
            RewriteError::ConfigError(_) => ErrorCategory::Configuration,
            RewriteError::CacheError(_) => ErrorCategory::Cache,
            RewriteError::ClientUnavailable(_) => ErrorCategory::Configuration,
            RewriteError::Cancelled => ErrorCategory::Cancelled,
            RewriteError::IoError(_) => ErrorCategory::Io,
            RewriteError::InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// 创建带上下文的错误
    pub fn with_context<T: fmt::Display>(self, context: T) -> Self {
        match self {
            RewriteError::ConfigError(msg) => {
                RewriteError::ConfigError(format!("{} (上下文: {})", msg, context))
            }
            RewriteError::CacheError(msg) => {
                RewriteError::CacheError(format!("{} (上下文: {})", msg, context))
            }
            RewriteError::IoError(msg) => {
                RewriteError::IoError(format!("{} (上下文: {})", msg, context))
            }
            RewriteError::InternalError(msg) => {
                RewriteError::InternalError(format!("{} (上下文: {})", msg, context))
            }
            other => other,
        }
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// 错误类别，用作统计中跳过原因的键
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    EmptyInput,
    TooLarge,
    MalformedInput,
    NodeNotFound,
    InvalidAddress,
    RateLimited,
    AuthenticationFailed,
    ModelUnavailable,
    Transport,
    RetriesExhausted,
    Configuration,
    Cache,
    Cancelled,
    Io,
    Internal,
}

impl From<&DocumentError> for ErrorCategory {
    fn from(error: &DocumentError) -> Self {
        match error {
            DocumentError::EmptyInput => ErrorCategory::EmptyInput,
            DocumentError::TooLarge { .. } => ErrorCategory::TooLarge,
            DocumentError::MalformedInput { .. } => ErrorCategory::MalformedInput,
            DocumentError::NodeNotFound { .. } => ErrorCategory::NodeNotFound,
            DocumentError::InvalidAddress { .. } => ErrorCategory::InvalidAddress,
        }
    }
}

impl From<&GenerationError> for ErrorCategory {
    fn from(error: &GenerationError) -> Self {
        match error {
            GenerationError::RateLimited(_) => ErrorCategory::RateLimited,
            GenerationError::AuthenticationFailed(_) => ErrorCategory::AuthenticationFailed,
            GenerationError::ModelUnavailable(_) => ErrorCategory::ModelUnavailable,
            GenerationError::TransportError(_) => ErrorCategory::Transport,
            GenerationError::RetriesExhausted { .. } => ErrorCategory::RetriesExhausted,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::EmptyInput => "empty_input",
            ErrorCategory::TooLarge => "too_large",
            ErrorCategory::MalformedInput => "malformed_input",
            ErrorCategory::NodeNotFound => "node_not_found",
            ErrorCategory::InvalidAddress => "invalid_address",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::AuthenticationFailed => "authentication_failed",
            ErrorCategory::ModelUnavailable => "model_unavailable",
            ErrorCategory::Transport => "transport",
            ErrorCategory::RetriesExhausted => "retries_exhausted",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Cache => "cache",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Io => "io",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// 标准错误转换
impl From<std::io::Error> for RewriteError {
    fn from(error: std::io::Error) -> Self {
        RewriteError::IoError(error.to_string())
    }
}

impl From<serde_json::Error> for RewriteError {
    fn from(error: serde_json::Error) -> Self {
        RewriteError::InternalError(format!("JSON序列化错误: {}", error))
    }
}

impl From<toml::de::Error> for RewriteError {
    fn from(error: toml::de::Error) -> Self {
        RewriteError::ConfigError(format!("TOML解析错误: {}", error))
    }
}

impl From<config::ConfigError> for RewriteError {
    fn from(error: config::ConfigError) -> Self {
        RewriteError::ConfigError(error.to_string())
    }
}

impl From<crate::env::EnvError> for RewriteError {
    fn from(error: crate::env::EnvError) -> Self {
        RewriteError::ConfigError(error.to_string())
    }
}

/// 错误结果类型别名
pub type RewriteResult<T> = Result<T, RewriteError>;

/// 生成调用结果类型别名
pub type GenerationResult<T> = Result<T, GenerationError>;

/// 错误处理助手函数
pub mod helpers {
    use super::*;

    /// 按严重程度记录错误
    pub fn log_error(error: &RewriteError) {
        match error.severity() {
            ErrorSeverity::Info => tracing::info!("改写信息: {}", error),
            ErrorSeverity::Warning => tracing::warn!("改写警告: {}", error),
            ErrorSeverity::Error => tracing::error!("改写错误: {}", error),
            ErrorSeverity::Critical => tracing::error!("改写严重错误: {}", error),
        }
    }

    /// 截断文档片段用于诊断，最多保留 `max_chars` 个字符
    pub fn excerpt(text: &str, max_chars: usize) -> String {
        let mut chars = text.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{}...", head)
        } else {
            head
        }
    }

    /// 创建配置错误
    pub fn config_error<T: fmt::Display>(msg: T) -> RewriteError {
        RewriteError::ConfigError(msg.to_string())
    }

    /// 创建缓存错误
    pub fn cache_error<T: fmt::Display>(msg: T) -> RewriteError {
        RewriteError::CacheError(msg.to_string())
    }
}
