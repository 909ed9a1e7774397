//! 响应缓存
//!
//! 以（消息列表、模型、影响输出的生成参数）为键缓存生成结果，带 TTL 过期和条目上限。
//! 缓存是尽力而为的：读写失败只记录日志，从不让调用方失败。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::rewrite::error::RewriteResult;
use crate::rewrite::llm::{ChatMessage, GenerationParams};

// ============================================================================
// 核心类型
// ============================================================================

/// 缓存键：规范化 JSON 的 SHA-256
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

/// 参与键计算的字段，字段顺序固定；超时等传输参数不在其中
#[derive(Serialize)]
struct KeyMaterial<'a> {
    messages: &'a [ChatMessage],
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    top_p: Option<f32>,
    top_k: Option<u32>,
}

impl CacheKey {
    pub fn new(messages: &[ChatMessage], model: &str, params: &GenerationParams) -> Self {
        let material = KeyMaterial {
            messages,
            model,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            top_k: params.top_k,
        };
        // 只包含字符串和数字，序列化不会失败
        let canonical = serde_json::to_vec(&material).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 条目元数据（索引中保存的部分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// 创建时间，Unix 毫秒
    pub timestamp_ms: i64,
    pub model: String,
    pub params: serde_json::Value,
}

/// 缓存条目
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub metadata: EntryMetadata,
    pub response: String,
}

impl CacheEntry {
    /// 以当前时间创建条目
    pub fn new(model: &str, params: &GenerationParams, response: impl Into<String>) -> Self {
        Self::with_timestamp(now_ms(), model, params, response)
    }

    /// 以指定时间创建条目
    pub fn with_timestamp(
        timestamp_ms: i64,
        model: &str,
        params: &GenerationParams,
        response: impl Into<String>,
    ) -> Self {
        Self {
            metadata: EntryMetadata {
                timestamp_ms,
                model: model.to_string(),
                params: serde_json::to_value(params).unwrap_or(serde_json::Value::Null),
            },
            response: response.into(),
        }
    }
}

/// 缓存统计信息
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    /// 计算缓存命中率
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// 响应缓存接口
pub trait ResponseCache: Send + Sync {
    /// 按键查找；过期或损坏的条目会被清除并视为不存在
    fn lookup(&self, key: &CacheKey) -> Option<String>;

    /// 写入条目，必要时按时间从旧到新驱逐
    fn store(&self, key: &CacheKey, entry: CacheEntry);

    /// 清空全部条目
    fn clear(&self) -> RewriteResult<()>;

    fn len(&self) -> usize;

    fn stats(&self) -> CacheStats;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, messages: &[ChatMessage], model: &str, params: &GenerationParams) -> Option<String> {
        self.lookup(&CacheKey::new(messages, model, params))
    }

    fn set(&self, messages: &[ChatMessage], model: &str, params: &GenerationParams, response: &str) {
        self.store(
            &CacheKey::new(messages, model, params),
            CacheEntry::new(model, params, response),
        );
    }
}

// ============================================================================
// 共享规则
// ============================================================================

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 条目年龄超过 TTL 即视为过期
pub(crate) fn is_expired(timestamp_ms: i64, now_ms: i64, ttl: Duration) -> bool {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(timestamp_ms) > ttl_ms
}

/// 选出需要驱逐的键：时间戳最旧的优先，时间戳相同时按键排序
pub(crate) fn eviction_victims(mut entries: Vec<(String, i64)>, max_entries: usize) -> Vec<String> {
    if entries.len() <= max_entries {
        return Vec::new();
    }
    let excess = entries.len() - max_entries;
    entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    entries.into_iter().take(excess).map(|(key, _)| key).collect()
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// 实现
// ============================================================================

/// 进程内缓存
pub struct MemoryCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    stats: Mutex<CacheStats>,
}

impl MemoryCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            stats: Mutex::new(CacheStats::default()),
        }
    }
}

impl ResponseCache for MemoryCache {
    fn lookup(&self, key: &CacheKey) -> Option<String> {
        let mut entries = lock(&self.entries);
        let mut stats = lock(&self.stats);

        let expired = match entries.get(key) {
            Some(entry) if !is_expired(entry.metadata.timestamp_ms, now_ms(), self.ttl) => {
                stats.hits += 1;
                return Some(entry.response.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
            stats.expired += 1;
        }
        stats.misses += 1;
        None
    }

    fn store(&self, key: &CacheKey, entry: CacheEntry) {
        let mut entries = lock(&self.entries);
        entries.insert(key.clone(), entry);

        let index: Vec<(String, i64)> = entries
            .iter()
            .map(|(k, e)| (k.0.clone(), e.metadata.timestamp_ms))
            .collect();
        let victims = eviction_victims(index, self.max_entries);
        if !victims.is_empty() {
            for victim in &victims {
                entries.remove(&CacheKey(victim.clone()));
            }
            lock(&self.stats).evictions += victims.len() as u64;
        }
    }

    fn clear(&self) -> RewriteResult<()> {
        lock(&self.entries).clear();
        Ok(())
    }

    fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    fn stats(&self) -> CacheStats {
        let mut stats = lock(&self.stats).clone();
        stats.entries = self.len();
        stats
    }
}

/// 不缓存
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl ResponseCache for NoCache {
    fn lookup(&self, _key: &CacheKey) -> Option<String> {
        None
    }

    fn store(&self, _key: &CacheKey, _entry: CacheEntry) {}

    fn clear(&self) -> RewriteResult<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        0
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}
