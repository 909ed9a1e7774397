//! 统一的环境变量管理系统
//!
//! 提供类型安全、可验证的环境变量访问

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// 环境变量解析错误
#[derive(Debug, Clone)]
pub struct EnvError {
    pub variable: String,
    pub message: String,
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment variable '{}': {}", self.variable, self.message)
    }
}

impl std::error::Error for EnvError {}

pub type EnvResult<T> = Result<T, EnvError>;

/// 环境变量访问器特性
pub trait EnvVar<T> {
    const NAME: &'static str;
    const DEFAULT: Option<T>;
    const DESCRIPTION: &'static str;

    fn parse(value: &str) -> EnvResult<T>;

    fn get() -> EnvResult<T> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value),
            Err(_) => {
                if let Some(default) = Self::DEFAULT {
                    Ok(default)
                } else {
                    Err(EnvError {
                        variable: Self::NAME.to_string(),
                        message: "Required environment variable not set".to_string(),
                    })
                }
            }
        }
    }

    fn get_or_default(default: T) -> T {
        Self::get().unwrap_or(default)
    }

    /// 变量未设置时返回 `Ok(None)`，设置了但无效时返回错误
    fn get_optional() -> EnvResult<Option<T>> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value).map(Some),
            Err(_) => Ok(None),
        }
    }
}

/// 核心环境变量定义
pub mod core {
    use super::*;

    /// 日志级别
    pub struct LogLevel;
    impl EnvVar<String> for LogLevel {
        const NAME: &'static str = "LLM_HTML_LOG_LEVEL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Log level: trace, debug, info, warn, error";

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("info".to_string()),
            }
        }

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_lowercase()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!(
                        "Invalid log level '{}'. Use: trace, debug, info, warn, error",
                        value
                    ),
                }),
            }
        }
    }

    /// 禁用颜色输出
    pub struct NoColor;
    impl EnvVar<bool> for NoColor {
        const NAME: &'static str = "NO_COLOR";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Disable colored output when set to any value";

        fn parse(value: &str) -> EnvResult<bool> {
            // NO_COLOR 遵循标准：任何非空值都表示禁用颜色
            Ok(!value.is_empty())
        }
    }
}

/// 生成后端相关环境变量
pub mod backend {
    use super::*;

    /// OpenAI API 密钥
    pub struct OpenAiApiKey;
    impl EnvVar<String> for OpenAiApiKey {
        const NAME: &'static str = "OPENAI_API_KEY";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "API key for the OpenAI chat completions backend";

        fn parse(value: &str) -> EnvResult<String> {
            parse_api_key(value, Self::NAME)
        }
    }

    /// Gemini API 密钥
    pub struct GeminiApiKey;
    impl EnvVar<String> for GeminiApiKey {
        const NAME: &'static str = "GEMINI_API_KEY";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "API key for the Gemini generateContent backend";

        fn parse(value: &str) -> EnvResult<String> {
            parse_api_key(value, Self::NAME)
        }
    }

    /// 本地模型服务地址
    pub struct LocalUrl;
    impl EnvVar<String> for LocalUrl {
        const NAME: &'static str = "LLM_HTML_LOCAL_URL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Base URL of the local (Ollama-compatible) model server";

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("http://localhost:11434".to_string()),
            }
        }

        fn parse(value: &str) -> EnvResult<String> {
            let parsed = url::Url::parse(value.trim()).map_err(|e| EnvError {
                variable: Self::NAME.to_string(),
                message: format!("Invalid URL '{}': {}", value, e),
            })?;

            match parsed.scheme() {
                "http" | "https" => Ok(value.trim().trim_end_matches('/').to_string()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "URL must start with http:// or https://".to_string(),
                }),
            }
        }
    }
}

/// 缓存相关环境变量
pub mod cache {
    use super::*;

    /// 缓存目录
    pub struct Dir;
    impl EnvVar<PathBuf> for Dir {
        const NAME: &'static str = "LLM_HTML_CACHE_DIR";
        const DEFAULT: Option<PathBuf> = None;
        const DESCRIPTION: &'static str = "Directory holding the response cache database";

        fn parse(value: &str) -> EnvResult<PathBuf> {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Cache directory must not be empty".to_string(),
                });
            }
            Ok(PathBuf::from(shellexpand::tilde(trimmed).into_owned()))
        }
    }

    /// 缓存TTL
    pub struct Ttl;
    impl EnvVar<Duration> for Ttl {
        const NAME: &'static str = "LLM_HTML_CACHE_TTL";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(86400));
        const DESCRIPTION: &'static str = "Cache TTL in seconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            let seconds: u64 = value.trim().parse().map_err(|_| EnvError {
                variable: Self::NAME.to_string(),
                message: "Must be a valid number of seconds".to_string(),
            })?;

            if seconds == 0 {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "TTL must be at least 1 second".to_string(),
                });
            }

            if seconds > 86400 * 365 {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "TTL too long (maximum 365 days)".to_string(),
                });
            }

            Ok(Duration::from_secs(seconds))
        }
    }

    /// 缓存条目上限
    pub struct MaxEntries;
    impl EnvVar<usize> for MaxEntries {
        const NAME: &'static str = "LLM_HTML_CACHE_MAX_ENTRIES";
        const DEFAULT: Option<usize> = Some(1000);
        const DESCRIPTION: &'static str = "Maximum number of cached responses";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 1, 10_000_000)
        }
    }
}

fn parse_api_key(value: &str, var_name: &str) -> EnvResult<String> {
    let key = value.trim();
    if key.is_empty() {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: "API key must not be empty".to_string(),
        });
    }
    Ok(key.to_string())
}

fn parse_positive_usize(value: &str, var_name: &str, min: usize, max: usize) -> EnvResult<usize> {
    let num: usize = value.trim().parse().map_err(|_| EnvError {
        variable: var_name.to_string(),
        message: "Must be a valid positive number".to_string(),
    })?;

    if num < min {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} is below minimum {}", num, min),
        });
    }

    if num > max {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} exceeds maximum {}", num, max),
        });
    }

    Ok(num)
}

/// 环境变量文档生成器
pub fn generate_env_docs() -> String {
    let entries: [(&str, &str); 8] = [
        (core::LogLevel::NAME, core::LogLevel::DESCRIPTION),
        (core::NoColor::NAME, core::NoColor::DESCRIPTION),
        (backend::OpenAiApiKey::NAME, backend::OpenAiApiKey::DESCRIPTION),
        (backend::GeminiApiKey::NAME, backend::GeminiApiKey::DESCRIPTION),
        (backend::LocalUrl::NAME, backend::LocalUrl::DESCRIPTION),
        (cache::Dir::NAME, cache::Dir::DESCRIPTION),
        (cache::Ttl::NAME, cache::Ttl::DESCRIPTION),
        (cache::MaxEntries::NAME, cache::MaxEntries::DESCRIPTION),
    ];

    let mut docs = String::from("Environment variables:\n");
    for (name, description) in entries {
        docs.push_str(&format!("  {:<28} {}\n", name, description));
    }
    docs
}
