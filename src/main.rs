//! llm-html-rewriter 命令行入口
//!
//! 处理单个 HTML 文件，或目录中的全部 `.html`/`.htm` 文件（`--recursive` 时包含子目录）。
//! 未指定输出时覆盖输入文件。

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use serde::Serialize;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use walkdir::WalkDir;

use llm_html_rewriter::env::{self as env_vars, EnvVar};
use llm_html_rewriter::rewrite::error::helpers::config_error;
use llm_html_rewriter::rewrite::storage::open_response_cache;
use llm_html_rewriter::rewrite::{
    BackendKind, CancelFlag, ConfigManager, HttpBackends, ProcessingConfig, ProcessingStats,
    RewriteError, RewriteResult, RewriteService, Settings, Task,
};

/// 使用大语言模型改写 HTML 文档中的文本，保留标记结构
#[derive(Parser, Debug)]
#[command(name = "llm-html-rewriter", version, about)]
struct Cli {
    /// 输入文件或目录
    #[arg(required_unless_present = "clear_cache", value_name = "INPUT")]
    input: Option<PathBuf>,

    /// 输出文件或目录（默认覆盖输入）
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// 任务: rewrite, summarize, custom
    #[arg(short, long)]
    task: Option<Task>,

    /// 目标语言
    #[arg(short, long)]
    language: Option<String>,

    /// 模型名称
    #[arg(short, long)]
    model: Option<String>,

    /// 生成后端: openai, gemini, local
    #[arg(short, long)]
    backend: Option<BackendKind>,

    #[arg(long)]
    temperature: Option<f32>,

    /// 最大输出 token 数
    #[arg(long)]
    max_tokens: Option<u32>,

    /// 自定义任务的指令（未指定任务时隐含 custom）
    #[arg(long)]
    prompt: Option<String>,

    /// 不使用响应缓存
    #[arg(long)]
    no_cache: bool,

    /// 处理前清空响应缓存
    #[arg(long)]
    clear_cache: bool,

    /// 缓存目录
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<String>,

    /// 少于该字符数的文本不处理
    #[arg(long)]
    min_text_length: Option<usize>,

    /// 批次内同时处理的片段数
    #[arg(long)]
    concurrency: Option<usize>,

    /// 目录模式下包含子目录
    #[arg(short, long)]
    recursive: bool,

    /// 将统计写入 JSON 文件
    #[arg(long, value_name = "FILE")]
    stats_file: Option<PathBuf>,

    /// 日志级别: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,

    /// 日志追加写入文件
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// 配置文件
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// 单个文件的处理记录
#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<ProcessingStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// 整次运行的统计
#[derive(Debug, Default, Serialize)]
struct RunReport {
    files: Vec<FileReport>,
    totals: ProcessingStats,
    failed_files: usize,
}

impl RunReport {
    fn record(&mut self, file: &Path, result: RewriteResult<ProcessingStats>) {
        let file = file.display().to_string();
        match result {
            Ok(stats) => {
                self.totals.merge(&stats);
                self.files.push(FileReport {
                    file,
                    status: if stats.errors == 0 { "success" } else { "partial" },
                    stats: Some(stats),
                    error: None,
                });
            }
            Err(e) => {
                tracing::error!("处理 {} 失败: {}", file, e);
                self.failed_files += 1;
                self.files.push(FileReport {
                    file,
                    status: "error",
                    stats: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    fn is_clean(&self) -> bool {
        self.failed_files == 0 && self.totals.errors == 0
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("错误: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> RewriteResult<bool> {
    let mut settings = ConfigManager::load(cli.config.as_deref())?.into_settings();
    if let Some(dir) = &cli.cache_dir {
        settings.cache_dir = Some(dir.clone());
    }

    let level = cli.log_level.as_deref().unwrap_or(&settings.log_level);
    init_logging(level, cli.log_file.as_deref())?;

    let config = processing_config(&cli, &settings.processing);
    config.validate()?;

    let cache = open_response_cache(&settings, config.use_cache || cli.clear_cache);
    if cli.clear_cache {
        cache.clear()?;
        tracing::info!("缓存已清空");
    }

    let Some(input) = cli.input.as_deref() else {
        return Ok(true);
    };

    let provider = Arc::new(HttpBackends::from_settings(&settings)?);
    let service = RewriteService::new(provider, cache, settings.retry_policy())
        .with_request_timeout(settings.request_timeout());

    let cancel = CancelFlag::new();
    watch_ctrl_c(cancel.clone());

    let mut report = RunReport::default();
    if input.is_dir() {
        let output_dir = cli.output.as_deref().unwrap_or(input);
        for file in html_files(input, cli.recursive) {
            if cancel.is_cancelled() {
                break;
            }
            let relative = file.strip_prefix(input).unwrap_or(&file);
            let target = output_dir.join(relative);
            let result = process_file(&service, &config, &cancel, &file, &target).await;
            report.record(&file, result);
        }
        if report.files.is_empty() {
            tracing::warn!("目录中没有 HTML 文件: {}", input.display());
        }
    } else {
        let target = cli.output.as_deref().unwrap_or(input);
        let result = process_file(&service, &config, &cancel, input, target).await;
        report.record(input, result);
    }

    tracing::info!(
        "共处理 {} 个文件（失败 {} 个）: {}",
        report.files.len(),
        report.failed_files,
        report.totals
    );

    if let Some(path) = &cli.stats_file {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)?;
        tracing::info!("统计已写入: {}", path.display());
    }

    Ok(report.is_clean())
}

/// 命令行参数覆盖配置文件中的处理配置
fn processing_config(cli: &Cli, base: &ProcessingConfig) -> ProcessingConfig {
    let mut config = base.clone();

    if let Some(task) = cli.task {
        config.task = task;
    } else if cli.prompt.is_some() {
        config.task = Task::Custom;
    }
    if let Some(language) = &cli.language {
        config.language = language.clone();
    }
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(temperature) = cli.temperature {
        config.temperature = temperature;
    }
    if let Some(max_tokens) = cli.max_tokens {
        config.max_tokens = max_tokens;
    }
    if let Some(prompt) = &cli.prompt {
        config.custom_prompt = Some(prompt.clone());
    }
    if cli.no_cache {
        config.use_cache = false;
    }
    if let Some(min_text_length) = cli.min_text_length {
        config.min_text_length = min_text_length;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }

    config
}

fn init_logging(level: &str, log_file: Option<&Path>) -> RewriteResult<()> {
    let level: Level = level
        .parse()
        .map_err(|_| config_error(format!("无效的日志级别: {}", level)))?;
    let no_color = env_vars::core::NoColor::get_or_default(false);

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false);

    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let subscriber = builder.with_ansi(false).with_writer(Mutex::new(file)).finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        None => {
            let subscriber = builder
                .with_ansi(!no_color)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };

    installed.map_err(|e| RewriteError::InternalError(format!("无法初始化日志: {}", e)))
}

/// Ctrl+C 时取消剩余片段，已完成的部分照常写出
fn watch_ctrl_c(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("收到中断信号，剩余片段保留原文");
            cancel.cancel();
        }
    });
}

fn html_files(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let max_depth = if recursive { usize::MAX } else { 1 };

    WalkDir::new(dir)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("无法读取目录项: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_html(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
}

async fn process_file(
    service: &RewriteService,
    config: &ProcessingConfig,
    cancel: &CancelFlag,
    input: &Path,
    output: &Path,
) -> RewriteResult<ProcessingStats> {
    tracing::info!("处理文件: {}", input.display());
    let html = tokio::fs::read_to_string(input).await?;

    let outcome = service.process_with_cancel(&html, config, cancel).await?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(output, &outcome.html).await?;
    tracing::info!("已保存: {}", output.display());

    Ok(outcome.stats)
}
