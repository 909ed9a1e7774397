//! 改写功能模块
//!
//! 把 HTML 文档中的文本交给外部文本生成服务改写，再按原位置写回，保留标记结构和书写方向。
//!
//! ## 模块组织
//!
//! - `config` - 常量与分层配置（文件、环境变量、默认值）
//! - `core` - 改写服务
//! - `error` - 错误类型
//! - `llm` - 文本生成能力、重试与 HTTP 后端
//! - `models` - 片段、处理配置与统计
//! - `pipeline` - 提取、分批、提示词与注入
//! - `storage` - 响应缓存

pub mod config;
pub mod core;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod storage;

// 重新导出主要类型
pub use self::config::{ConfigManager, Settings};
pub use self::core::{CancelFlag, RewriteService};
pub use error::{DocumentError, ErrorCategory, GenerationError, RewriteError, RewriteResult};
pub use llm::{
    ChatMessage, FixedProvider, GenerationParams, GeneratorProvider, HttpBackends, RetryPolicy,
    TextGenerator,
};
pub use models::{
    BackendKind, Fragment, ProcessingConfig, ProcessingOutcome, ProcessingStats, Task,
};
pub use pipeline::{extract, inject};
pub use storage::{open_response_cache, DiskCache, MemoryCache, NoCache, ResponseCache};
