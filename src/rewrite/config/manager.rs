//! 配置管理器
//!
//! 默认值、配置文件和环境变量三层叠加，后者覆盖前者

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use super::constants;
use crate::rewrite::error::{RewriteError, RewriteResult};
use crate::rewrite::llm::retry::RetryPolicy;
use crate::rewrite::models::ProcessingConfig;

/// 运行设置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    // 后端
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub local_url: String,
    pub request_timeout_secs: u64,

    // 缓存
    pub cache_dir: Option<String>,
    /// 秒
    pub cache_ttl: u64,
    pub cache_max_entries: usize,

    // 重试
    pub retry_max_attempts: usize,
    pub retry_initial_delay_ms: u64,
    pub retry_backoff_factor: f64,
    pub retry_max_delay_ms: u64,

    pub log_level: String,

    /// 处理参数的默认值，命令行参数可以覆盖
    pub processing: ProcessingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: constants::DEFAULT_OPENAI_URL.to_string(),
            gemini_api_key: None,
            gemini_base_url: constants::DEFAULT_GEMINI_URL.to_string(),
            local_url: constants::DEFAULT_LOCAL_URL.to_string(),
            request_timeout_secs: constants::DEFAULT_REQUEST_TIMEOUT.as_secs(),

            cache_dir: None,
            cache_ttl: constants::DEFAULT_CACHE_TTL.as_secs(),
            cache_max_entries: constants::DEFAULT_CACHE_MAX_ENTRIES,

            retry_max_attempts: constants::MAX_RETRY_ATTEMPTS,
            retry_initial_delay_ms: constants::RETRY_INITIAL_DELAY.as_millis() as u64,
            retry_backoff_factor: constants::RETRY_BACKOFF_FACTOR,
            retry_max_delay_ms: constants::RETRY_MAX_DELAY.as_millis() as u64,

            log_level: "info".to_string(),

            processing: ProcessingConfig::default(),
        }
    }
}

impl Settings {
    /// 验证配置
    pub fn validate(&self) -> RewriteResult<()> {
        for (name, value) in [
            ("openai_base_url", &self.openai_base_url),
            ("gemini_base_url", &self.gemini_base_url),
            ("local_url", &self.local_url),
        ] {
            let url = url::Url::parse(value)
                .map_err(|e| RewriteError::ConfigError(format!("{} 无效 '{}': {}", name, value, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(RewriteError::ConfigError(format!(
                    "{} 必须以 http:// 或 https:// 开头: {}",
                    name, value
                )));
            }
        }

        if self.request_timeout_secs == 0 {
            return Err(RewriteError::ConfigError("请求超时不能为0".to_string()));
        }

        if self.cache_ttl == 0 {
            return Err(RewriteError::ConfigError("缓存TTL不能为0".to_string()));
        }

        if self.cache_max_entries == 0 {
            return Err(RewriteError::ConfigError("缓存条目上限不能为0".to_string()));
        }

        if self.retry_max_attempts == 0 {
            return Err(RewriteError::ConfigError("最大尝试次数不能为0".to_string()));
        }

        if self.retry_backoff_factor < 1.0 {
            return Err(RewriteError::ConfigError(format!(
                "退避因子不能小于1: {}",
                self.retry_backoff_factor
            )));
        }

        self.processing.validate()
    }

    /// 应用环境变量覆盖（类型安全的环境变量访问）
    pub fn apply_env_overrides(&mut self) -> RewriteResult<()> {
        use crate::env::{backend, cache, core, EnvVar};

        if let Some(key) = backend::OpenAiApiKey::get_optional()? {
            self.openai_api_key = Some(key);
        }

        if let Some(key) = backend::GeminiApiKey::get_optional()? {
            self.gemini_api_key = Some(key);
        }

        if let Some(url) = backend::LocalUrl::get_optional()? {
            tracing::info!("环境变量覆盖本地模型地址: {}", url);
            self.local_url = url;
        }

        if let Some(dir) = cache::Dir::get_optional()? {
            self.cache_dir = Some(dir.to_string_lossy().into_owned());
        }

        if let Some(ttl) = cache::Ttl::get_optional()? {
            self.cache_ttl = ttl.as_secs();
        }

        if let Some(max_entries) = cache::MaxEntries::get_optional()? {
            self.cache_max_entries = max_entries;
        }

        if let Some(level) = core::LogLevel::get_optional()? {
            self.log_level = level;
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            backoff_factor: self.retry_backoff_factor,
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// 缓存数据库文件路径
    ///
    /// 依次使用配置的目录、系统缓存目录、当前目录下的 `.llm-html-rewriter-cache`。
    pub fn cache_path(&self) -> PathBuf {
        let dir = match &self.cache_dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).into_owned()),
            None => directories::ProjectDirs::from("", "", "llm-html-rewriter")
                .map(|dirs| dirs.cache_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".llm-html-rewriter-cache")),
        };
        dir.join(constants::CACHE_FILE_NAME)
    }
}

/// 配置管理器
pub struct ConfigManager {
    settings: Settings,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// 按默认搜索路径加载配置
    pub fn new() -> RewriteResult<Self> {
        Self::load(None)
    }

    /// 加载配置；`explicit` 指定的文件必须存在
    pub fn load(explicit: Option<&Path>) -> RewriteResult<Self> {
        Self::load_dotenv();

        let source = match explicit {
            Some(path) => {
                let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
                if !expanded.exists() {
                    return Err(RewriteError::ConfigError(format!(
                        "配置文件不存在: {}",
                        expanded.display()
                    )));
                }
                Some(expanded)
            }
            None => Self::find_config_file(),
        };

        let mut builder = Config::builder();

        if let Some(path) = &source {
            tracing::info!("加载配置文件: {}", path.display());
            builder = builder.add_source(File::from(path.as_path()));
        } else {
            tracing::debug!("未找到配置文件，使用默认配置");
        }

        // 添加环境变量覆盖（启用类型转换）
        builder = builder.add_source(
            Environment::with_prefix("LLM_HTML")
                .prefix_separator("_")
                .try_parsing(true),
        );

        let mut settings: Settings = builder
            .build()
            .map_err(|e| RewriteError::ConfigError(format!("构建配置失败: {}", e)))?
            .try_deserialize()
            .map_err(|e| RewriteError::ConfigError(format!("反序列化配置失败: {}", e)))?;

        settings.apply_env_overrides()?;
        settings.validate()?;

        Ok(Self { settings, source })
    }

    /// 获取配置
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn into_settings(self) -> Settings {
        self.settings
    }

    /// 实际加载的配置文件
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    fn find_config_file() -> Option<PathBuf> {
        constants::CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).into_owned()))
            .find(|path| path.exists())
    }

    /// 加载 .env 文件
    fn load_dotenv() {
        let env_files = [".env.local", ".env"];

        for env_file in &env_files {
            if Path::new(env_file).exists() && dotenv::from_filename(env_file).is_ok() {
                tracing::info!("已加载环境变量文件: {}", env_file);
                break;
            }
        }
    }

    /// 生成示例配置文件
    pub fn generate_example_config(path: &Path) -> RewriteResult<()> {
        let content = toml::to_string_pretty(&Settings::default())
            .map_err(|e| RewriteError::ConfigError(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| RewriteError::ConfigError(format!("写入配置文件失败: {}", e)))?;

        Ok(())
    }
}
