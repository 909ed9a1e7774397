//! # LLM HTML Rewriter Library
//!
//! 使用大语言模型改写 HTML 文档中的文本，同时保留标记结构和从右到左的书写方向。
//!
//! ## 模块组织
//!
//! - `parsers` - HTML 解析、结构化地址与序列化
//! - `rewrite` - 提取、缓存、重试、改写服务与注入
//! - `env` - 类型化的环境变量访问

pub mod env;
pub mod parsers;
pub mod rewrite;

// Re-export commonly used items for convenience
pub use rewrite::{
    BackendKind, CancelFlag, DocumentError, Fragment, GenerationError, ProcessingConfig,
    ProcessingOutcome, ProcessingStats, RewriteError, RewriteResult, RewriteService, Task,
};
