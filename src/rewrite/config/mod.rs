//! 改写配置管理模块
//!
//! 提供配置管理，支持环境变量、配置文件和默认值

pub mod manager;

// 重新导出主要类型
pub use manager::{ConfigManager, Settings};

/// 配置常量
pub mod constants {
    use std::time::Duration;

    // 文档大小限制
    pub const MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;
    pub const MIN_DOCUMENT_BYTES: usize = 10;
    pub const EXCERPT_CHARS: usize = 100;

    // 流水线
    pub const MAX_RETRY_ATTEMPTS: usize = 3;
    pub const DEFAULT_BATCH_SIZE: usize = 10;
    pub const DEFAULT_MIN_TEXT_LENGTH: usize = 2;

    // 默认生成参数
    pub const DEFAULT_LANGUAGE: &str = "he";
    pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;
    pub const DEFAULT_MAX_TOKENS: u32 = 2048;

    // 重试策略
    pub const RETRY_INITIAL_DELAY: Duration = Duration::from_secs(2);
    pub const RETRY_BACKOFF_FACTOR: f64 = 2.0;
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);

    // 后端
    pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
    pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
    pub const DEFAULT_LOCAL_URL: &str = "http://localhost:11434";
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    // 缓存设置
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);
    pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;
    pub const CACHE_FILE_NAME: &str = "responses.redb";

    // 从右到左书写的语言
    pub const RTL_LANGUAGES: &[&str] = &[
        "ar", "he", "fa", "ur", "yi", "ps", "sd", "ug", "dv", "ckb",
    ];

    // 配置文件搜索路径
    pub const CONFIG_PATHS: &[&str] = &[
        "llm-html-rewriter.toml",
        ".llm-html-rewriter.toml",
        "~/.config/llm-html-rewriter/config.toml",
    ];
}

/// 是否存在配置文件
pub fn config_file_exists() -> bool {
    constants::CONFIG_PATHS
        .iter()
        .any(|path| std::path::Path::new(shellexpand::tilde(path).as_ref()).exists())
}
