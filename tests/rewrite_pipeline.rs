//! 改写流水线集成测试
//!
//! 从文档输入到统计输出，覆盖提取、重试、取消与写回

use std::sync::Arc;
use std::time::Duration;

use llm_html_rewriter::rewrite::error::ErrorCategory;
use llm_html_rewriter::rewrite::llm::{FixedProvider, GeneratorProvider, TextGenerator};
use llm_html_rewriter::rewrite::storage::NoCache;
use llm_html_rewriter::rewrite::{extract, inject, RetryPolicy};
use llm_html_rewriter::{
    BackendKind, CancelFlag, GenerationError, ProcessingConfig, RewriteError, RewriteResult,
    RewriteService, Task,
};

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{
    CancellingGenerator, ScriptedGenerator, TestDocuments, TestEnvironment, UppercaseGenerator,
};

/// 测试从右到左段落与普通段落一起改写
#[tokio::test]
async fn test_rtl_document_is_rewritten_in_place() {
    let generator = UppercaseGenerator::new();
    let service = TestEnvironment::new().service(generator.clone());

    let outcome = service
        .process(
            "<p dir=\"rtl\">שלום עולם</p><p>Hello</p>",
            &ProcessingConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.html, "<p dir=\"rtl\">שלום עולם</p><p>HELLO</p>");
    assert_eq!(outcome.stats.fragments_seen, 2);
    assert_eq!(outcome.stats.fragments_rewritten, 2);
    assert_eq!(outcome.stats.errors, 0);
    assert_eq!(generator.calls(), 2);
}

/// 测试共享 class 的兄弟元素：短文本保持不变，改写写入正确的元素
#[tokio::test]
async fn test_shared_class_siblings_are_not_mixed_up() {
    let generator = UppercaseGenerator::new();
    let service = TestEnvironment::new().service(generator.clone());

    let outcome = service
        .process(
            "<ul><li class=\"item\">1</li><li class=\"item\">Second item</li></ul>",
            &ProcessingConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome.html,
        "<ul><li class=\"item\">1</li><li class=\"item\">SECOND ITEM</li></ul>"
    );
    assert_eq!(outcome.stats.fragments_seen, 1);
    assert_eq!(outcome.stats.fragments_rewritten, 1);
    assert_eq!(generator.calls(), 1);
}

/// 测试完整文档：跳过样式和代码，保留文档结构
#[tokio::test]
async fn test_full_document_keeps_structure() {
    let generator = UppercaseGenerator::new();
    let service = TestEnvironment::new().service(generator.clone());

    let outcome = service
        .process(TestDocuments::article(), &ProcessingConfig::default())
        .await
        .unwrap();

    assert!(outcome.html.starts_with("<!DOCTYPE html>"));
    assert!(outcome.html.contains("<h1 id=\"title\">WHAT CHANGED</h1>"));
    assert!(outcome
        .html
        .contains("<p class=\"lead\">THE CACHE NOW EXPIRES OLD ENTRIES.</p>"));
    assert!(outcome.html.contains("<li>FASTER STARTUP</li><li>FEWER RETRIES</li>"));
    assert!(outcome.html.contains("p { color: red; }"));
    assert!(outcome.html.contains("<code>let x = 1;</code>"));
    assert_eq!(outcome.stats.fragments_rewritten, outcome.stats.fragments_seen);
    assert_eq!(outcome.stats.errors, 0);
}

/// 测试空文档：原样返回，计一个警告
#[tokio::test]
async fn test_empty_document_is_a_warning() {
    let generator = UppercaseGenerator::new();
    let service = TestEnvironment::new().service(generator.clone());

    let outcome = service.process("", &ProcessingConfig::default()).await.unwrap();

    assert_eq!(outcome.html, "");
    assert_eq!(outcome.stats.errors, 0);
    assert_eq!(outcome.stats.warnings, 1);
    assert_eq!(outcome.stats.fragments_seen, 0);
    assert_eq!(generator.calls(), 0);
}

/// 测试超大文档：原样返回，计一个错误
#[tokio::test]
async fn test_oversized_document_is_an_error() {
    let generator = UppercaseGenerator::new();
    let service = TestEnvironment::new().service(generator.clone());
    let huge = format!("<p>{}</p>", "a".repeat(11 * 1024 * 1024));

    let outcome = service.process(&huge, &ProcessingConfig::default()).await.unwrap();

    assert_eq!(outcome.html.len(), huge.len());
    assert!(outcome.html == huge);
    assert_eq!(outcome.stats.errors, 1);
    assert_eq!(generator.calls(), 0);
}

/// 测试清理后仍无法解析的文档
#[tokio::test]
async fn test_malformed_document_is_returned_unchanged() {
    let generator = UppercaseGenerator::new();
    let service = TestEnvironment::new().service(generator.clone());
    let broken = "<p>Hello world</p><div class=\"unterminated";

    let outcome = service.process(broken, &ProcessingConfig::default()).await.unwrap();

    assert_eq!(outcome.html, broken);
    assert_eq!(outcome.stats.errors, 1);
    assert_eq!(generator.calls(), 0);
}

/// 测试认证失败不重试，保留原文
#[tokio::test]
async fn test_authentication_failure_is_not_retried() {
    let generator = ScriptedGenerator::failing_with(vec![GenerationError::AuthenticationFailed(
        "401 invalid api key".to_string(),
    )]);
    let service = TestEnvironment::new().service(generator.clone());

    let outcome = service
        .process("<p>only paragraph</p>", &ProcessingConfig::default())
        .await
        .unwrap();

    assert_eq!(outcome.html, "<p>only paragraph</p>");
    assert_eq!(generator.calls(), 1);
    assert_eq!(outcome.stats.retries, 0);
    assert_eq!(outcome.stats.errors, 1);
    assert_eq!(
        outcome.stats.skip_reasons.get(&ErrorCategory::AuthenticationFailed),
        Some(&1)
    );
}

/// 测试速率限制按退避重试到上限，等待时间递增
#[tokio::test(start_paused = true)]
async fn test_rate_limit_retries_with_growing_delays() {
    let generator = ScriptedGenerator::always_rate_limited(10);
    let service = TestEnvironment::new().service(generator.clone());

    let outcome = service
        .process("<p>throttled text</p>", &ProcessingConfig::default())
        .await
        .unwrap();

    assert_eq!(generator.calls(), 3);
    let gaps = generator.gaps();
    assert_eq!(gaps.len(), 2);
    assert!(gaps[0] >= Duration::from_secs(2));
    assert!(gaps[1] > gaps[0]);

    assert_eq!(outcome.html, "<p>throttled text</p>");
    assert_eq!(outcome.stats.retries, 2);
    assert_eq!(outcome.stats.errors, 1);
    assert_eq!(
        outcome.stats.skip_reasons.get(&ErrorCategory::RetriesExhausted),
        Some(&1)
    );
}

/// 测试暂时性错误后重试成功
#[tokio::test(start_paused = true)]
async fn test_transient_failure_then_success() {
    let generator = ScriptedGenerator::failing_with(vec![GenerationError::TransportError(
        "connection reset".to_string(),
    )]);
    let service = TestEnvironment::new().service(generator.clone());

    let outcome = service
        .process("<p>eventually works</p>", &ProcessingConfig::default())
        .await
        .unwrap();

    assert_eq!(outcome.html, "<p>EVENTUALLY WORKS</p>");
    assert_eq!(generator.calls(), 2);
    assert_eq!(outcome.stats.retries, 1);
    assert_eq!(outcome.stats.errors, 0);
}

/// 测试自定义重试策略
#[tokio::test]
async fn test_single_attempt_policy() {
    let generator = ScriptedGenerator::always_rate_limited(5);
    let policy = RetryPolicy {
        max_attempts: 1,
        ..Default::default()
    };
    let service = TestEnvironment::new().with_policy(policy).service(generator.clone());

    let outcome = service
        .process("<p>no second chance</p>", &ProcessingConfig::default())
        .await
        .unwrap();

    assert_eq!(generator.calls(), 1);
    assert_eq!(outcome.stats.retries, 0);
    assert_eq!(outcome.stats.errors, 1);
}

/// 测试片段按 10 个一批处理
#[tokio::test]
async fn test_fragments_are_processed_in_batches() {
    let generator = UppercaseGenerator::new();
    let service = TestEnvironment::new().service(generator.clone());
    let html = TestDocuments::paragraphs(25);

    let outcome = service.process(&html, &ProcessingConfig::default()).await.unwrap();

    assert_eq!(outcome.stats.fragments_seen, 25);
    assert_eq!(outcome.stats.fragments_rewritten, 25);
    assert_eq!(outcome.stats.batches, 3);
    assert_eq!(generator.calls(), 25);
    assert!(outcome.html.contains("<p>PARAGRAPH NUMBER 24</p>"));
}

/// 测试批次内并发处理后结果仍按原顺序写回
#[tokio::test]
async fn test_concurrent_batches_keep_order() {
    let generator = UppercaseGenerator::new();
    let service = TestEnvironment::new().service(generator.clone());
    let config = ProcessingConfig {
        concurrency: 4,
        ..Default::default()
    };

    let outcome = service
        .process(&TestDocuments::paragraphs(12), &config)
        .await
        .unwrap();

    let expected: String = (0..12)
        .map(|i| format!("<p>PARAGRAPH NUMBER {}</p>", i))
        .collect();
    assert!(outcome.html.contains(&expected));
}

/// 测试运行中途取消：已完成的片段写回，其余保留原文
#[tokio::test]
async fn test_cancel_mid_run() {
    let cancel = CancelFlag::new();
    let generator = CancellingGenerator::new(cancel.clone());
    let service = TestEnvironment::new().service(generator.clone());

    let outcome = service
        .process_with_cancel(
            "<p>first one</p><p>second one</p><p>third one</p>",
            &ProcessingConfig::default(),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(generator.calls(), 1);
    assert_eq!(
        outcome.html,
        "<p>FIRST ONE</p><p>second one</p><p>third one</p>"
    );
    assert_eq!(outcome.stats.fragments_rewritten, 1);
    assert_eq!(outcome.stats.fragments_skipped, 2);
    assert_eq!(outcome.stats.skip_reasons.get(&ErrorCategory::Cancelled), Some(&2));
    assert_eq!(outcome.stats.warnings, 1);
}

/// 测试摘要任务和自定义任务的提示词到达生成器
#[tokio::test]
async fn test_task_changes_prompt() {
    let generator = UppercaseGenerator::new();
    let service = TestEnvironment::new().service(generator.clone());
    let config = ProcessingConfig {
        task: Task::Custom,
        custom_prompt: Some("Shout this:".to_string()),
        ..Default::default()
    };

    let outcome = service.process("<p>quiet words</p>", &config).await.unwrap();

    assert_eq!(outcome.html, "<p>QUIET WORDS</p>");
}

/// 无法构造生成客户端的提供者
struct Unavailable;

impl GeneratorProvider for Unavailable {
    fn generator(
        &self,
        _backend: BackendKind,
        _model: &str,
    ) -> RewriteResult<Arc<dyn TextGenerator>> {
        Err(RewriteError::ClientUnavailable("未设置 OPENAI_API_KEY".to_string()))
    }
}

/// 测试缺少生成客户端是唯一的运行级失败
#[tokio::test]
async fn test_missing_client_fails_the_run() {
    let service = RewriteService::new(
        Arc::new(Unavailable),
        Arc::new(NoCache),
        RetryPolicy::default(),
    );

    let result = service
        .process("<p>needs a client</p>", &ProcessingConfig::default())
        .await;
    assert!(matches!(result, Err(RewriteError::ClientUnavailable(_))));

    // 没有可处理的文本时不需要客户端
    let outcome = service
        .process("<p>x</p><p>y</p>", &ProcessingConfig::default())
        .await
        .unwrap();
    assert_eq!(outcome.stats.fragments_seen, 0);
}

/// 测试无效配置在处理前被拒绝
#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let generator = UppercaseGenerator::new();
    let service = RewriteService::new(
        Arc::new(FixedProvider(generator.clone())),
        Arc::new(NoCache),
        RetryPolicy::default(),
    );
    let config = ProcessingConfig {
        batch_size: 0,
        ..Default::default()
    };

    let result = service.process("<p>some text</p>", &config).await;

    assert!(matches!(result, Err(RewriteError::ConfigError(_))));
    assert_eq!(generator.calls(), 0);
}

/// 测试提取后直接写回得到原文档
#[test]
fn test_extract_then_inject_is_identity() {
    for doc in [
        "<p dir=\"rtl\">שלום עולם</p><p>Hello</p>",
        "<div><p class=\"lead\">First <b>bold</b> second</p><ul><li>One</li><li>Two</li></ul></div>",
        "<ul><li class=\"item\">1</li><li class=\"item\">Second item</li></ul>",
        "<p id=\"dup\">x</p><p id=\"dup\">Repeated id</p>",
    ] {
        let fragments = extract(doc, 2).unwrap();
        assert_eq!(inject(doc, &fragments, true).unwrap(), doc);
    }
}
