//! 缓存存储模块

pub mod cache;
pub mod disk;

use std::sync::Arc;

pub use cache::{CacheEntry, CacheKey, CacheStats, EntryMetadata, MemoryCache, NoCache, ResponseCache};
pub use disk::DiskCache;

use super::config::Settings;

/// 按设置打开磁盘缓存
///
/// 打开失败（例如数据库被另一个进程占用）时退化为不缓存，并记录警告。
pub fn open_response_cache(settings: &Settings, enabled: bool) -> Arc<dyn ResponseCache> {
    if !enabled {
        return Arc::new(NoCache);
    }

    let path = settings.cache_path();
    match DiskCache::open(&path, settings.cache_ttl(), settings.cache_max_entries) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            tracing::warn!("{}，本次运行不使用缓存", e);
            Arc::new(NoCache)
        }
    }
}
