//! 测试通用工具模块
//!
//! 提供测试中常用的工具函数和辅助存储。

#![allow(dead_code)]

use async_trait::async_trait;
use cachepool::{
    error::StorageError,
    memory_storage::MemoryStorage,
    pool::{CacheItemPool, CachePool, PoolOptions},
    storage::Storage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// 初始化测试日志，可通过 RUST_LOG 调整级别
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// 创建测试用的内存存储
pub fn create_memory_storage() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new())
}

/// 创建测试用的内存缓存池
pub fn create_memory_pool(namespace: &str) -> Arc<dyn CacheItemPool> {
    Arc::new(CachePool::with_namespace(create_memory_storage(), namespace).unwrap())
}

/// 在给定存储上创建版本化缓存池
pub fn create_versioned_pool(storage: Arc<dyn Storage>, namespace: &str) -> CachePool {
    CachePool::new(
        storage,
        PoolOptions::new().namespace(namespace).versioning(true),
    )
    .unwrap()
}

/// 记录调用次数的存储
///
/// 所有操作委托给内存存储，用于断言后端往返次数。
#[derive(Default)]
pub struct CountingStorage {
    inner: MemoryStorage,
    fetches: AtomicU64,
    multi_fetches: AtomicU64,
    saves: AtomicU64,
    deletes: AtomicU64,
    clears: AtomicU64,
    increments: AtomicU64,
}

impl CountingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn multi_fetches(&self) -> u64 {
        self.multi_fetches.load(Ordering::Relaxed)
    }

    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn clears(&self) -> u64 {
        self.clears.load(Ordering::Relaxed)
    }

    pub fn increments(&self) -> u64 {
        self.increments.load(Ordering::Relaxed)
    }

    /// 全部调用次数
    pub fn calls(&self) -> u64 {
        self.fetches()
            + self.multi_fetches()
            + self.saves()
            + self.deletes()
            + self.clears()
            + self.increments()
    }

    pub fn reset(&self) {
        for counter in [
            &self.fetches,
            &self.multi_fetches,
            &self.saves,
            &self.deletes,
            &self.clears,
            &self.increments,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl Storage for CountingStorage {
    async fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.inner.fetch(id).await
    }

    async fn fetch_multiple(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, StorageError> {
        self.multi_fetches.fetch_add(1, Ordering::Relaxed);
        self.inner.fetch_multiple(ids).await
    }

    async fn has(&self, id: &str) -> Result<bool, StorageError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.inner.has(id).await
    }

    async fn save(&self, id: &str, bytes: &[u8], ttl: Option<Duration>) -> Result<(), StorageError> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.inner.save(id, bytes, ttl).await
    }

    async fn save_multiple(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Option<Duration>,
    ) -> Result<Vec<String>, StorageError> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.inner.save_multiple(entries, ttl).await
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.inner.delete(id).await
    }

    async fn delete_multiple(&self, ids: &[String]) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.inner.delete_multiple(ids).await
    }

    async fn clear(&self, prefix: &str) -> Result<(), StorageError> {
        self.clears.fetch_add(1, Ordering::Relaxed);
        self.inner.clear(prefix).await
    }

    async fn increment_seeded(
        &self,
        id: &str,
        delta: u64,
        seed: u64,
    ) -> Result<u64, StorageError> {
        self.increments.fetch_add(1, Ordering::Relaxed);
        self.inner.increment_seeded(id, delta, seed).await
    }
}

/// 所有操作都失败的存储，模拟后端不可用
#[derive(Debug, Default)]
pub struct FailingStorage;

fn unavailable() -> StorageError {
    StorageError::ConnectionError("backend unavailable".to_string())
}

#[async_trait]
impl Storage for FailingStorage {
    async fn fetch(&self, _id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Err(unavailable())
    }

    async fn save(
        &self,
        _id: &str,
        _bytes: &[u8],
        _ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        Err(unavailable())
    }

    async fn delete(&self, _id: &str) -> Result<(), StorageError> {
        Err(unavailable())
    }

    async fn clear(&self, _prefix: &str) -> Result<(), StorageError> {
        Err(unavailable())
    }

    async fn increment_seeded(
        &self,
        _id: &str,
        _delta: u64,
        _seed: u64,
    ) -> Result<u64, StorageError> {
        Err(unavailable())
    }
}

/// 等待指定时间（简化测试代码）
pub async fn wait_millis(ms: u64) {
    sleep(Duration::from_millis(ms)).await;
}

/// 断言结果为Ok
pub fn assert_ok<T, E: std::fmt::Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// 断言结果为Err
pub fn assert_err<T, E: std::fmt::Debug>(result: Result<T, E>) -> E {
    match result {
        Ok(_) => panic!("Expected Err, got Ok"),
        Err(e) => e,
    }
}
