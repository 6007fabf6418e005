//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Redis存储实现
//!
//! 基于 `ConnectionManager` 的 Redis 后端，过期交给 Redis 原生 TTL，
//! 计数器由 Lua 脚本完成 `SETNX` + `INCRBY`，保证原子性。
//!
//! # 特性
//!
//! - **重试机制**: 指数退避重试，连接错误时自动重连
//! - **按前缀清除**: `SCAN MATCH` 分批删除，不阻塞服务器
//! - **凭据保护**: 密码使用 `secrecy::Secret` 包装

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, IntoConnectionInfo, Script};
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::constants::{REDIS_SCAN_COUNT, REDIS_SEEDED_INCR_SCRIPT};
use crate::error::StorageError;
use crate::storage::Storage;

/// Redis配置
#[derive(Clone)]
pub struct RedisConfig {
    /// Redis连接URL
    pub url: String,
    /// 数据库索引
    pub db: i64,
    /// 密码（使用 Secret 包装以防止意外泄露）
    pub password: Option<Secret<String>>,
    /// 读写超时
    pub io_timeout: Duration,
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试初始退避时间
    pub retry_initial_backoff: Duration,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.url)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("io_timeout", &self.io_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_initial_backoff", &self.retry_initial_backoff)
            .finish()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            password: None,
            io_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_initial_backoff: Duration::from_millis(100),
        }
    }
}

impl RedisConfig {
    /// 创建新的Redis配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置数据库索引
    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// 设置密码
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password.into()));
        self
    }

    /// 设置IO超时
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// 设置最大重试次数
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// 设置重试初始退避时间
    pub fn retry_initial_backoff(mut self, backoff: Duration) -> Self {
        self.retry_initial_backoff = backoff;
        self
    }
}

/// 重试统计
#[derive(Debug, Default)]
pub struct RetryStats {
    successful_retries: AtomicU64,
    failed_retries: AtomicU64,
}

impl RetryStats {
    pub fn total_retries(&self) -> u64 {
        self.successful_retries() + self.failed_retries()
    }

    pub fn successful_retries(&self) -> u64 {
        self.successful_retries.load(Ordering::Relaxed)
    }

    pub fn failed_retries(&self) -> u64 {
        self.failed_retries.load(Ordering::Relaxed)
    }

    fn record_success(&self) {
        self.successful_retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed_retries.fetch_add(1, Ordering::Relaxed);
    }
}

/// 转义 glob 元字符，用于 `SCAN MATCH`
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

/// 将 TTL 转为 `PX` 参数（至少 1 毫秒）
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Redis存储实现
pub struct RedisStorage {
    /// 连接管理器
    conn_manager: Mutex<Option<ConnectionManager>>,
    /// 配置
    config: RedisConfig,
    /// 重试统计
    retry_stats: RetryStats,
    /// 带种子的计数器脚本
    seeded_incr: Script,
}

impl RedisStorage {
    /// 创建新的Redis存储并建立连接
    pub async fn new(config: RedisConfig) -> Result<Self, StorageError> {
        info!("创建Redis存储, URL: {}", config.url);

        let storage = Self {
            conn_manager: Mutex::new(None),
            config,
            retry_stats: RetryStats::default(),
            seeded_incr: Script::new(REDIS_SEEDED_INCR_SCRIPT),
        };
        storage.connect().await?;

        info!("Redis存储创建成功");
        Ok(storage)
    }

    /// 检查Redis连接
    pub async fn ping(&self) -> Result<(), StorageError> {
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    /// 获取重试统计
    pub fn retry_stats(&self) -> &RetryStats {
        &self.retry_stats
    }

    /// 建立连接
    async fn connect(&self) -> Result<(), StorageError> {
        debug!("建立Redis连接");

        let mut info = self.config.url.as_str().into_connection_info().map_err(|e| {
            error!("解析Redis URL失败: {}", e);
            StorageError::ConnectionError(format!("解析Redis URL失败: {}", e))
        })?;
        info.redis.db = self.config.db;
        if let Some(password) = &self.config.password {
            info.redis.password = Some(password.expose_secret().clone());
        }

        let client = Client::open(info).map_err(|e| {
            error!("创建Redis客户端失败: {}", e);
            StorageError::ConnectionError(format!("创建Redis客户端失败: {}", e))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("创建Redis连接管理器失败: {}", e);
            StorageError::ConnectionError(format!("创建Redis连接管理器失败: {}", e))
        })?;

        *self.conn_manager.lock().await = Some(conn_manager);
        info!("Redis连接建立成功");
        Ok(())
    }

    async fn connection(&self) -> Result<ConnectionManager, StorageError> {
        self.conn_manager
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| StorageError::ConnectionError("连接未初始化".to_string()))
    }

    /// 带重试和超时的执行
    async fn execute_with_retry<F, Fut, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StorageError>>,
    {
        let mut last_error = None;
        let mut backoff = self.config.retry_initial_backoff;

        for attempt in 0..=self.config.max_retries {
            let outcome = match tokio::time::timeout(self.config.io_timeout, f()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StorageError::TimeoutError(format!(
                    "Redis操作超过 {:?}",
                    self.config.io_timeout
                ))),
            };

            match outcome {
                Ok(result) => {
                    if attempt > 0 {
                        self.retry_stats.record_success();
                        debug!("重试成功，尝试次数: {}", attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if attempt < self.config.max_retries {
                        warn!(
                            "操作失败，将在 {:?} 后重试 (尝试 {}/{}): {}",
                            backoff,
                            attempt + 1,
                            self.config.max_retries,
                            e
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.mul_f32(2.0);

                        if matches!(e, StorageError::ConnectionError(_)) {
                            if let Err(reconnect_err) = self.connect().await {
                                error!("重新连接失败: {}", reconnect_err);
                            }
                        }
                    }
                    last_error = Some(e);
                }
            }
        }

        self.retry_stats.record_failure();
        error!("操作失败，已达最大重试次数: {:?}", last_error);
        Err(last_error.unwrap_or_else(|| StorageError::TimeoutError("操作超时".to_string())))
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let result: Option<Vec<u8>> =
                redis::cmd("GET").arg(id).query_async(&mut conn).await?;
            trace!("GET id={}, hit={}", id, result.is_some());
            Ok(result)
        })
        .await
    }

    async fn fetch_multiple(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, StorageError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let values: Vec<Option<Vec<u8>>> = self
            .execute_with_retry(|| async {
                let mut conn = self.connection().await?;
                let values = redis::cmd("MGET").arg(ids).query_async(&mut conn).await?;
                Ok(values)
            })
            .await?;

        Ok(ids
            .iter()
            .zip(values)
            .filter_map(|(id, value)| value.map(|bytes| (id.clone(), bytes)))
            .collect())
    }

    async fn has(&self, id: &str) -> Result<bool, StorageError> {
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let exists: bool = redis::cmd("EXISTS").arg(id).query_async(&mut conn).await?;
            Ok(exists)
        })
        .await
    }

    async fn save(
        &self,
        id: &str,
        bytes: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let mut cmd = redis::cmd("SET");
            cmd.arg(id).arg(bytes);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl_millis(ttl));
            }
            let _: () = cmd.query_async(&mut conn).await?;
            trace!("SET id={}, ttl={:?}", id, ttl);
            Ok(())
        })
        .await
    }

    async fn save_multiple(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Option<Duration>,
    ) -> Result<Vec<String>, StorageError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let result = self
            .execute_with_retry(|| async {
                let mut conn = self.connection().await?;
                let mut pipe = redis::pipe();
                for (id, bytes) in entries {
                    let cmd = pipe.cmd("SET").arg(id).arg(bytes.as_slice());
                    if let Some(ttl) = ttl {
                        cmd.arg("PX").arg(ttl_millis(ttl));
                    }
                    cmd.ignore();
                }
                let _: () = pipe.query_async(&mut conn).await?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(Vec::new()),
            Err(e) => {
                warn!("Redis批量写入失败: {}", e);
                Ok(entries.iter().map(|(id, _)| id.clone()).collect())
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let _: () = redis::cmd("DEL").arg(id).query_async(&mut conn).await?;
            trace!("DEL id={}", id);
            Ok(())
        })
        .await
    }

    async fn delete_multiple(&self, ids: &[String]) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.execute_with_retry(|| async {
            let mut conn = self.connection().await?;
            let _: () = redis::cmd("DEL").arg(ids).query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn clear(&self, prefix: &str) -> Result<(), StorageError> {
        let pattern = escape_glob(prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, ids): (u64, Vec<String>) = self
                .execute_with_retry(|| async {
                    let mut conn = self.connection().await?;
                    let page = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(REDIS_SCAN_COUNT)
                        .query_async(&mut conn)
                        .await?;
                    Ok(page)
                })
                .await?;

            removed += ids.len();
            self.delete_multiple(&ids).await?;

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Redis按前缀 {} 清除 {} 个键", prefix, removed);
        Ok(())
    }

    async fn increment_seeded(
        &self,
        id: &str,
        delta: u64,
        seed: u64,
    ) -> Result<u64, StorageError> {
        let delta = i64::try_from(delta)
            .map_err(|_| StorageError::QueryError(format!("递增量 {} 超出范围", delta)))?;
        let seed = i64::try_from(seed)
            .map_err(|_| StorageError::QueryError(format!("计数器种子 {} 超出范围", seed)))?;
        let value: i64 = self
            .execute_with_retry(|| async {
                let mut conn = self.connection().await?;
                let value = self
                    .seeded_incr
                    .key(id)
                    .arg(seed)
                    .arg(delta)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(value)
            })
            .await?;

        u64::try_from(value)
            .map_err(|_| StorageError::Corrupted(format!("计数器 {} 为负数", id)))
    }
}
