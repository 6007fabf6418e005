//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! PostgreSQL存储实现
//!
//! 使用sqlx实现PostgreSQL存储，过期时间随行保存，读取时删除过期行，
//! `prune` 批量删除所有过期行。
//!
//! # 数据库Schema
//!
//! ```sql
//! CREATE TABLE cache_items (
//!     item_id VARCHAR(255) NOT NULL PRIMARY KEY,
//!     item_data BYTEA NOT NULL,
//!     item_lifetime BIGINT NULL,
//!     item_time BIGINT NOT NULL
//! );
//! ```
//!
//! `item_time` 为写入时间，`item_lifetime` 为生命周期（均为秒），
//! `item_lifetime` 为 `NULL` 表示永不过期。

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, Secret};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, trace};

use crate::constants::{DEFAULT_POSTGRES_TABLE, POSTGRES_MAX_ID_LENGTH};
use crate::error::StorageError;
use crate::storage::{encode_counter, parse_counter, PruneableStorage, Storage};

/// PostgreSQL存储配置
#[derive(Clone)]
pub struct PostgresStorageConfig {
    /// 数据库连接URL（使用 Secret 包装以防止意外泄露）
    pub database_url: Secret<String>,
    /// 表名
    pub table: String,
    /// 连接池最大连接数
    pub max_connections: u32,
    /// 连接池最小空闲连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub connect_timeout: u64,
}

impl std::fmt::Debug for PostgresStorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStorageConfig")
            .field("database_url", &"***")
            .field("table", &self.table)
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Default for PostgresStorageConfig {
    fn default() -> Self {
        Self {
            database_url: Secret::new(String::new()),
            table: DEFAULT_POSTGRES_TABLE.to_string(),
            max_connections: 20,
            min_connections: 1,
            connect_timeout: 30,
        }
    }
}

impl PostgresStorageConfig {
    /// 创建新的配置
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: Secret::new(database_url.into()),
            ..Default::default()
        }
    }

    /// 设置表名
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// 设置最大连接数
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// 设置最小连接数
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// 设置连接超时
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout.as_secs();
        self
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.expose_secret().is_empty() {
            return Err("数据库连接URL不能为空".to_string());
        }
        let mut chars = self.table.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(format!("非法表名: {}", self.table));
        }
        if self.min_connections > self.max_connections {
            return Err("最小连接数不能大于最大连接数".to_string());
        }
        Ok(())
    }
}

/// 转义 LIKE 通配符
fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// 生命周期（秒，向上取整）
fn lifetime_secs(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| {
        let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        i64::try_from(secs).unwrap_or(i64::MAX)
    })
}

/// PostgreSQL存储实现
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    table: String,
}

impl PostgresStorage {
    /// 创建新的PostgreSQL存储实例
    ///
    /// # 错误
    ///
    /// 配置非法或无法连接到数据库时返回错误
    pub async fn new(config: PostgresStorageConfig) -> Result<Self, StorageError> {
        config.validate().map_err(StorageError::QueryError)?;
        info!("正在连接PostgreSQL数据库...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(config.database_url.expose_secret())
            .await
            .map_err(|e| {
                error!("数据库连接失败: {}", e);
                StorageError::ConnectionError(format!("无法连接到数据库: {}", e))
            })?;

        info!("成功连接到PostgreSQL数据库");
        Ok(Self {
            pool,
            table: config.table,
        })
    }

    /// 从连接池创建存储实例
    pub fn from_pool(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    /// 获取连接池引用
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 表名
    pub fn table(&self) -> &str {
        &self.table
    }

    /// 创建缓存表（已存在时不做任何事）
    pub async fn create_table(&self) -> Result<(), StorageError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                item_id VARCHAR(255) NOT NULL PRIMARY KEY, \
                item_data BYTEA NOT NULL, \
                item_lifetime BIGINT NULL, \
                item_time BIGINT NOT NULL)",
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        debug!("缓存表 {} 已就绪", self.table);
        Ok(())
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::ConnectionError(format!("健康检查失败: {}", e)))?;
        Ok(())
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    /// 删除给定ID中已过期的行
    async fn delete_expired(&self, ids: &[String]) -> Result<(), StorageError> {
        let sql = format!(
            "DELETE FROM {} WHERE item_lifetime IS NOT NULL \
             AND item_lifetime + item_time <= $1 AND item_id = ANY($2)",
            self.table
        );
        sqlx::query(&sql)
            .bind(Self::now())
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut found = self.fetch_multiple(&[id.to_string()]).await?;
        Ok(found.remove(id))
    }

    async fn fetch_multiple(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, StorageError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.delete_expired(ids).await?;

        let sql = format!(
            "SELECT item_id, item_data FROM {} WHERE item_id = ANY($1) \
             AND (item_lifetime IS NULL OR item_lifetime + item_time > $2)",
            self.table
        );
        let rows: Vec<(String, Vec<u8>)> = sqlx::query_as(&sql)
            .bind(ids)
            .bind(Self::now())
            .fetch_all(&self.pool)
            .await?;
        trace!("SELECT {} 个ID, 命中 {}", ids.len(), rows.len());
        Ok(rows.into_iter().collect())
    }

    async fn has(&self, id: &str) -> Result<bool, StorageError> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE item_id = $1 \
             AND (item_lifetime IS NULL OR item_lifetime + item_time > $2)",
            self.table
        );
        let row: Option<i32> = sqlx::query_scalar(&sql)
            .bind(id)
            .bind(Self::now())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn save(
        &self,
        id: &str,
        bytes: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let sql = format!(
            "INSERT INTO {} (item_id, item_data, item_lifetime, item_time) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (item_id) DO UPDATE SET \
             item_data = EXCLUDED.item_data, \
             item_lifetime = EXCLUDED.item_lifetime, \
             item_time = EXCLUDED.item_time",
            self.table
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(bytes)
            .bind(lifetime_secs(ttl))
            .bind(Self::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.delete_multiple(&[id.to_string()]).await
    }

    async fn delete_multiple(&self, ids: &[String]) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!("DELETE FROM {} WHERE item_id = ANY($1)", self.table);
        sqlx::query(&sql).bind(ids).execute(&self.pool).await?;
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> Result<(), StorageError> {
        let result = if prefix.is_empty() {
            sqlx::query(&format!("DELETE FROM {}", self.table))
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE item_id LIKE $1 ESCAPE '\\'",
                self.table
            ))
            .bind(escape_like(prefix))
            .execute(&self.pool)
            .await?
        };
        debug!("按前缀 {} 删除 {} 行", prefix, result.rows_affected());
        Ok(())
    }

    async fn increment_seeded(
        &self,
        id: &str,
        delta: u64,
        seed: u64,
    ) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;

        let insert = format!(
            "INSERT INTO {} (item_id, item_data, item_lifetime, item_time) \
             VALUES ($1, $2, NULL, $3) ON CONFLICT (item_id) DO NOTHING",
            self.table
        );
        sqlx::query(&insert)
            .bind(id)
            .bind(encode_counter(seed))
            .bind(Self::now())
            .execute(&mut *tx)
            .await?;

        let select = format!(
            "SELECT item_data FROM {} WHERE item_id = $1 FOR UPDATE",
            self.table
        );
        let current: Vec<u8> = sqlx::query_scalar(&select)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let next = parse_counter(id, &current)?
            .checked_add(delta)
            .ok_or_else(|| StorageError::Corrupted(format!("计数器 {} 溢出", id)))?;

        if delta != 0 {
            let update = format!(
                "UPDATE {} SET item_data = $2, item_lifetime = NULL, item_time = $3 \
                 WHERE item_id = $1",
                self.table
            );
            sqlx::query(&update)
                .bind(id)
                .bind(encode_counter(next))
                .bind(Self::now())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(next)
    }

    fn max_id_length(&self) -> Option<usize> {
        Some(POSTGRES_MAX_ID_LENGTH)
    }

    fn as_pruneable(&self) -> Option<&dyn PruneableStorage> {
        Some(self)
    }
}

#[async_trait]
impl PruneableStorage for PostgresStorage {
    async fn prune(&self) -> Result<u64, StorageError> {
        let sql = format!(
            "DELETE FROM {} WHERE item_lifetime IS NOT NULL AND item_lifetime + item_time <= $1",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(Self::now())
            .execute(&self.pool)
            .await?;
        debug!("PostgreSQL清理了 {} 个过期行", result.rows_affected());
        Ok(result.rows_affected())
    }
}
