//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 内存存储实现
//!
//! 使用 `parking_lot::Mutex<lru::LruCache>` 实现的进程内存储，容量受限，
//! 超出容量时淘汰最近最少使用的条目。过期条目在读取时惰性删除。
//!
//! # 使用示例
//!
//! ```no_run
//! use cachepool::memory_storage::{MemoryStorage, MemoryStorageConfig};
//! use cachepool::storage::Storage;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = MemoryStorage::with_config(MemoryStorageConfig::new().capacity(1_000));
//!     storage.save("app:key", b"value", Some(Duration::from_secs(30))).await.unwrap();
//!     assert!(storage.has("app:key").await.unwrap());
//! }
//! ```

use async_trait::async_trait;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

use crate::constants::DEFAULT_MEMORY_CAPACITY;
use crate::error::StorageError;
use crate::storage::{encode_counter, parse_counter, Storage};

/// 存储条目
#[derive(Debug, Clone)]
struct MemoryEntry {
    bytes: Vec<u8>,
    /// 过期时间（None表示永不过期）
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(bytes: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            bytes,
            expires_at: ttl.and_then(|d| Instant::now().checked_add(d)),
        }
    }

    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(expires_at) if Instant::now() >= expires_at)
    }
}

/// 内存存储配置
#[derive(Debug, Clone)]
pub struct MemoryStorageConfig {
    /// 容量（条目数）
    pub capacity: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

impl MemoryStorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// 存储统计信息
#[derive(Debug, Default)]
pub struct MemoryStats {
    /// 命中次数
    hits: AtomicU64,
    /// 未命中次数
    misses: AtomicU64,
    /// 过期次数
    expirations: AtomicU64,
    /// 淘汰次数
    evictions: AtomicU64,
    /// 写入次数
    writes: AtomicU64,
}

impl MemoryStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

/// 内存存储
pub struct MemoryStorage {
    data: parking_lot::Mutex<lru::LruCache<String, MemoryEntry>>,
    config: MemoryStorageConfig,
    stats: MemoryStats,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// 使用默认容量创建
    pub fn new() -> Self {
        Self::with_config(MemoryStorageConfig::default())
    }

    /// 使用配置创建
    pub fn with_config(config: MemoryStorageConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            data: parking_lot::Mutex::new(lru::LruCache::new(capacity)),
            config,
            stats: MemoryStats::default(),
        }
    }

    /// 当前条目数（含尚未被读取清理的过期条目）
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }

    pub fn config(&self) -> &MemoryStorageConfig {
        &self.config
    }

    /// 读取未过期条目，过期条目顺便删除
    fn read(&self, id: &str) -> Option<Vec<u8>> {
        let mut cache = self.data.lock();
        match cache.get(id) {
            Some(entry) if entry.is_expired() => {
                cache.pop(id);
                self.stats.expirations.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.bytes.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn write(&self, id: &str, entry: MemoryEntry) {
        let mut cache = self.data.lock();
        if !cache.contains(id) && cache.len() >= cache.cap().get() {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        cache.put(id.to_string(), entry);
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.read(id))
    }

    async fn has(&self, id: &str) -> Result<bool, StorageError> {
        let cache = self.data.lock();
        Ok(cache.peek(id).is_some_and(|entry| !entry.is_expired()))
    }

    async fn save(
        &self,
        id: &str,
        bytes: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        trace!("内存存储写入 {}", id);
        self.write(id, MemoryEntry::new(bytes.to_vec(), ttl));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.data.lock().pop(id);
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<(), StorageError> {
        let mut cache = self.data.lock();
        if prefix.is_empty() {
            cache.clear();
            return Ok(());
        }

        let doomed: Vec<String> = cache
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            cache.pop(id);
        }
        trace!("按前缀 {} 清除 {} 个条目", prefix, doomed.len());
        Ok(())
    }

    async fn increment_seeded(
        &self,
        id: &str,
        delta: u64,
        seed: u64,
    ) -> Result<u64, StorageError> {
        // 读取和写入在同一把锁内完成
        let mut cache = self.data.lock();
        let current = match cache.get(id) {
            Some(entry) if !entry.is_expired() => parse_counter(id, &entry.bytes)?,
            _ => seed,
        };
        let next = current.checked_add(delta).ok_or_else(|| {
            StorageError::Corrupted(format!("计数器 {} 溢出", id))
        })?;
        cache.put(id.to_string(), MemoryEntry::new(encode_counter(next), None));
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(next)
    }
}
