//! 基于 redb 的磁盘缓存
//!
//! `metadata` 表保存索引（键 → JSON 元数据），`payloads` 表保存响应正文。
//! 每次写入在一个事务内完成插入和驱逐，索引不会出现半写状态。
//! redb 对数据库文件加锁，另一个进程已打开时 [`DiskCache::open`] 返回错误。

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use super::cache::{
    eviction_victims, is_expired, lock, now_ms, CacheEntry, CacheKey, CacheStats, EntryMetadata,
    ResponseCache,
};
use crate::rewrite::error::{RewriteError, RewriteResult};

const METADATA: TableDefinition<&str, &str> = TableDefinition::new("metadata");
const PAYLOADS: TableDefinition<&str, &str> = TableDefinition::new("payloads");

pub struct DiskCache {
    db: Database,
    path: PathBuf,
    ttl: Duration,
    max_entries: usize,
    stats: Mutex<CacheStats>,
}

/// 查找结果
enum Lookup {
    Hit(String),
    Miss,
    /// 过期或损坏，需要清除
    Purge { expired: bool },
}

impl DiskCache {
    pub fn open(path: &Path, ttl: Duration, max_entries: usize) -> RewriteResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                RewriteError::CacheError(format!("无法创建缓存目录 {}: {}", parent.display(), e))
            })?;
        }

        let db = Database::create(path).map_err(|e| {
            RewriteError::CacheError(format!("无法打开缓存数据库 {}: {}", path.display(), e))
        })?;

        // 预先建表，之后的只读事务不会遇到表不存在
        let init = || -> Result<(), redb::Error> {
            let txn = db.begin_write()?;
            {
                txn.open_table(METADATA)?;
                txn.open_table(PAYLOADS)?;
            }
            txn.commit()?;
            Ok(())
        };
        init().map_err(|e| RewriteError::CacheError(format!("初始化缓存表失败: {}", e)))?;

        tracing::debug!("缓存数据库: {}", path.display());

        Ok(Self {
            db,
            path: path.to_path_buf(),
            ttl,
            max_entries: max_entries.max(1),
            stats: Mutex::new(CacheStats::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entry(&self, key: &str) -> Result<Lookup, redb::Error> {
        let txn = self.db.begin_read()?;
        let metadata_table = txn.open_table(METADATA)?;

        let raw = match metadata_table.get(key)? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(Lookup::Miss),
        };

        let metadata: EntryMetadata = match serde_json::from_str(&raw) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("缓存元数据损坏 {}: {}", key, e);
                return Ok(Lookup::Purge { expired: false });
            }
        };

        if is_expired(metadata.timestamp_ms, now_ms(), self.ttl) {
            return Ok(Lookup::Purge { expired: true });
        }

        let payload_table = txn.open_table(PAYLOADS)?;
        let payload = payload_table.get(key)?.map(|guard| guard.value().to_string());
        match payload {
            Some(response) => Ok(Lookup::Hit(response)),
            None => {
                tracing::warn!("缓存正文缺失: {}", key);
                Ok(Lookup::Purge { expired: false })
            }
        }
    }

    fn remove_entry(&self, key: &str) -> Result<(), redb::Error> {
        let txn = self.db.begin_write()?;
        {
            let mut metadata_table = txn.open_table(METADATA)?;
            metadata_table.remove(key)?;
            let mut payload_table = txn.open_table(PAYLOADS)?;
            payload_table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// 写入并驱逐，返回驱逐数
    fn write_entry(&self, key: &str, entry: &CacheEntry) -> Result<usize, redb::Error> {
        let metadata = serde_json::to_string(&entry.metadata).unwrap_or_default();

        let txn = self.db.begin_write()?;
        let evicted = {
            let mut metadata_table = txn.open_table(METADATA)?;
            let mut payload_table = txn.open_table(PAYLOADS)?;

            metadata_table.insert(key, metadata.as_str())?;
            payload_table.insert(key, entry.response.as_str())?;

            let victims = if metadata_table.len()? as usize > self.max_entries {
                let mut index = Vec::new();
                for item in metadata_table.iter()? {
                    let (k, v) = item?;
                    // 无法解析的元数据按最旧处理
                    let timestamp = serde_json::from_str::<EntryMetadata>(v.value())
                        .map(|m| m.timestamp_ms)
                        .unwrap_or(i64::MIN);
                    index.push((k.value().to_string(), timestamp));
                }
                eviction_victims(index, self.max_entries)
            } else {
                Vec::new()
            };

            for victim in &victims {
                metadata_table.remove(victim.as_str())?;
                payload_table.remove(victim.as_str())?;
            }
            victims.len()
        };
        txn.commit()?;

        Ok(evicted)
    }

    fn count(&self) -> Result<usize, redb::Error> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(METADATA)?;
        Ok(table.len()? as usize)
    }

    fn clear_tables(&self) -> Result<(), redb::Error> {
        let txn = self.db.begin_write()?;
        txn.delete_table(METADATA)?;
        txn.delete_table(PAYLOADS)?;
        {
            txn.open_table(METADATA)?;
            txn.open_table(PAYLOADS)?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl ResponseCache for DiskCache {
    fn lookup(&self, key: &CacheKey) -> Option<String> {
        let outcome = self.read_entry(key.as_str()).unwrap_or_else(|e| {
            tracing::warn!("读取缓存失败: {}", e);
            Lookup::Miss
        });

        let mut stats = lock(&self.stats);
        match outcome {
            Lookup::Hit(response) => {
                stats.hits += 1;
                Some(response)
            }
            Lookup::Miss => {
                stats.misses += 1;
                None
            }
            Lookup::Purge { expired } => {
                stats.misses += 1;
                if expired {
                    stats.expired += 1;
                }
                drop(stats);
                if let Err(e) = self.remove_entry(key.as_str()) {
                    tracing::warn!("清除缓存条目失败: {}", e);
                }
                None
            }
        }
    }

    fn store(&self, key: &CacheKey, entry: CacheEntry) {
        match self.write_entry(key.as_str(), &entry) {
            Ok(0) => {}
            Ok(evicted) => {
                tracing::debug!("缓存已满，驱逐 {} 个最旧条目", evicted);
                lock(&self.stats).evictions += evicted as u64;
            }
            Err(e) => tracing::warn!("写入缓存失败: {}", e),
        }
    }

    fn clear(&self) -> RewriteResult<()> {
        self.clear_tables()
            .map_err(|e| RewriteError::CacheError(format!("清空缓存失败: {}", e)))?;
        tracing::info!("缓存已清空: {}", self.path.display());
        Ok(())
    }

    fn len(&self) -> usize {
        self.count().unwrap_or_else(|e| {
            tracing::warn!("读取缓存大小失败: {}", e);
            0
        })
    }

    fn stats(&self) -> CacheStats {
        let mut stats = lock(&self.stats).clone();
        stats.entries = self.len();
        stats
    }
}
