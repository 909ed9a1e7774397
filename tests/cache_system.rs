//! 缓存系统集成测试
//!
//! 测试内存缓存和磁盘缓存在改写服务中的行为，以及持久化、过期和驱逐

use std::sync::Arc;
use std::time::Duration;

use llm_html_rewriter::rewrite::llm::{ChatMessage, GenerationParams};
use llm_html_rewriter::rewrite::storage::{
    CacheEntry, CacheKey, DiskCache, MemoryCache, ResponseCache,
};
use llm_html_rewriter::ProcessingConfig;

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{TestDocuments, TestEnvironment, UppercaseGenerator};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn messages(text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are an expert text rewriting assistant."),
        ChatMessage::user(format!("Rewrite this text: {}", text)),
    ]
}

/// 测试 TTL 内的相同请求只调用一次生成器
#[tokio::test]
async fn test_identical_requests_within_ttl_call_once() {
    let generator = UppercaseGenerator::new();
    let service = TestEnvironment::new()
        .with_memory_cache()
        .service(generator.clone());
    let config = ProcessingConfig::default();
    let html = "<p>cached paragraph</p>";

    let first = service.process(html, &config).await.unwrap();
    let second = service.process(html, &config).await.unwrap();

    assert_eq!(generator.calls(), 1);
    assert_eq!(first.html, second.html);
    assert_eq!(first.stats.cache_hits, 0);
    assert_eq!(second.stats.cache_hits, 1);
    assert_eq!(second.stats.tokens_in, 0);
    assert_eq!(service.cache().stats().hits, 1);
}

/// 测试关闭缓存后每次都调用生成器
#[tokio::test]
async fn test_cache_disabled_by_config() {
    let generator = UppercaseGenerator::new();
    let service = TestEnvironment::new()
        .with_memory_cache()
        .service(generator.clone());
    let config = ProcessingConfig {
        use_cache: false,
        ..Default::default()
    };

    service.process("<p>not cached</p>", &config).await.unwrap();
    service.process("<p>not cached</p>", &config).await.unwrap();

    assert_eq!(generator.calls(), 2);
    assert!(service.cache().is_empty());
}

/// 测试生成参数不同的请求不共用缓存
#[tokio::test]
async fn test_params_are_part_of_the_key() {
    let generator = UppercaseGenerator::new();
    let service = TestEnvironment::new()
        .with_memory_cache()
        .service(generator.clone());
    let cool = ProcessingConfig::default();
    let warm = ProcessingConfig {
        temperature: 1.2,
        ..Default::default()
    };

    service.process("<p>same words</p>", &cool).await.unwrap();
    service.process("<p>same words</p>", &warm).await.unwrap();

    assert_eq!(generator.calls(), 2);
    assert_eq!(service.cache().len(), 2);
}

/// 测试磁盘缓存跨运行持久化
#[tokio::test]
async fn test_disk_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("responses.redb");
    let html = TestDocuments::paragraphs(3);
    let config = ProcessingConfig::default();

    let first_generator = UppercaseGenerator::new();
    {
        let cache = Arc::new(DiskCache::open(&path, Duration::from_secs(3600), 100).unwrap());
        let service = TestEnvironment::new()
            .with_cache(cache)
            .service(first_generator.clone());
        service.process(&html, &config).await.unwrap();
    }
    assert_eq!(first_generator.calls(), 3);

    let second_generator = UppercaseGenerator::new();
    let cache = Arc::new(DiskCache::open(&path, Duration::from_secs(3600), 100).unwrap());
    let service = TestEnvironment::new()
        .with_cache(cache)
        .service(second_generator.clone());
    let outcome = service.process(&html, &config).await.unwrap();

    assert_eq!(second_generator.calls(), 0);
    assert_eq!(outcome.stats.cache_hits, 3);
    assert!(outcome.html.contains("<p>PARAGRAPH NUMBER 2</p>"));
}

/// 测试过期条目被清除并视为未命中
#[test]
fn test_disk_cache_expires_entries() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::open(&dir.path().join("c.redb"), Duration::from_secs(3600), 10).unwrap();
    let params = GenerationParams::default();
    let key = CacheKey::new(&messages("old"), "m", &params);

    let two_hours_ago = now_ms() - 2 * 3600 * 1000;
    cache.store(&key, CacheEntry::with_timestamp(two_hours_ago, "m", &params, "OLD"));
    assert_eq!(cache.len(), 1);

    assert_eq!(cache.lookup(&key), None);
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.stats().expired, 1);
}

/// 测试超过上限时先驱逐最旧的条目
#[test]
fn test_disk_cache_evicts_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::open(&dir.path().join("c.redb"), Duration::from_secs(3600), 2).unwrap();
    let params = GenerationParams::default();
    let base = now_ms();

    let keys: Vec<CacheKey> = ["one", "two", "three"]
        .iter()
        .map(|text| CacheKey::new(&messages(text), "m", &params))
        .collect();
    for (offset, key) in keys.iter().enumerate() {
        let entry = CacheEntry::with_timestamp(base + offset as i64, "m", &params, "X");
        cache.store(key, entry);
    }

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.lookup(&keys[0]), None);
    assert!(cache.lookup(&keys[1]).is_some());
    assert!(cache.lookup(&keys[2]).is_some());
    assert_eq!(cache.stats().evictions, 1);
}

/// 测试内存缓存同样遵守上限
#[test]
fn test_memory_cache_bound() {
    let cache = MemoryCache::new(Duration::from_secs(3600), 1);
    let params = GenerationParams::default();
    let base = now_ms();

    let older = CacheKey::new(&messages("older"), "m", &params);
    let newer = CacheKey::new(&messages("newer"), "m", &params);
    cache.store(&older, CacheEntry::with_timestamp(base - 10, "m", &params, "A"));
    cache.store(&newer, CacheEntry::with_timestamp(base, "m", &params, "B"));

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.lookup(&newer), Some("B".to_string()));
}

/// 测试清空磁盘缓存
#[test]
fn test_disk_cache_clear() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::open(&dir.path().join("c.redb"), Duration::from_secs(3600), 10).unwrap();
    let params = GenerationParams::default();

    cache.set(&messages("a"), "m", &params, "A");
    cache.set(&messages("b"), "m", &params, "B");
    assert_eq!(cache.len(), 2);

    cache.clear().unwrap();
    assert!(cache.is_empty());
    assert_eq!(cache.get(&messages("a"), "m", &params), None);
}

/// 测试同一数据库不能被打开两次
#[test]
fn test_disk_cache_is_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.redb");
    let _held = DiskCache::open(&path, Duration::from_secs(60), 10).unwrap();

    assert!(DiskCache::open(&path, Duration::from_secs(60), 10).is_err());
}
