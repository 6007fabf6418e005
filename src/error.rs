//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 错误类型定义
//!
//! 使用thiserror定义所有错误类型。
//!
//! 分层约定：
//! - [`CacheError`] 面向调用方，只有编程错误（非法键、非法配置）会从池操作中返回；
//! - [`StorageError`] 面向后端，池在写路径上将其转换为 `false`，在读路径上转换为未命中。

use thiserror::Error;

/// 缓存池错误类型
#[derive(Error, Debug)]
pub enum CacheError {
    /// 非法缓存键（空键、包含保留字符或超长）
    #[error("非法缓存键: {0}")]
    InvalidKey(String),

    /// 配置错误（构造阶段）
    #[error("配置错误: {0}")]
    InvalidConfiguration(String),

    /// 序列化/反序列化失败
    #[error("序列化失败: {0}")]
    Serialization(String),

    /// 存储错误
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON错误
    #[error("JSON错误: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML解析错误
    #[error("YAML解析错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML解析错误
    #[error("TOML解析错误: {0}")]
    Toml(#[from] toml::de::Error),
}

/// 存储错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// 连接错误
    #[error("连接错误: {0}")]
    ConnectionError(String),

    /// 查询错误
    #[error("查询错误: {0}")]
    QueryError(String),

    /// 超时错误
    #[error("超时错误: {0}")]
    TimeoutError(String),

    /// 未找到
    #[error("未找到: {0}")]
    NotFound(String),

    /// 存储内容损坏（如计数器不是数字）
    #[error("数据损坏: {0}")]
    Corrupted(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(err.to_string()),
            std::io::ErrorKind::TimedOut => StorageError::TimeoutError(err.to_string()),
            _ => StorageError::QueryError(err.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => StorageError::QueryError(db_err.to_string()),
            sqlx::Error::PoolTimedOut => StorageError::TimeoutError("连接池超时".to_string()),
            sqlx::Error::PoolClosed => StorageError::ConnectionError("连接池已关闭".to_string()),
            sqlx::Error::RowNotFound => StorageError::NotFound("记录未找到".to_string()),
            _ => StorageError::QueryError(err.to_string()),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StorageError::TimeoutError(err.to_string())
        } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            StorageError::ConnectionError(err.to_string())
        } else {
            StorageError::QueryError(err.to_string())
        }
    }
}

impl CacheError {
    /// 是否为调用方编程错误
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            CacheError::InvalidKey(_) | CacheError::InvalidConfiguration(_)
        )
    }
}
