//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 存储抽象层
//!
//! 定义后端存储接口和空实现。后端只处理不透明的 ID 和字节，
//! 键编码、版本和标签语义都在缓存池一侧完成。

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tracing::trace;

use crate::error::StorageError;

/// 存储接口
#[async_trait]
pub trait Storage: Send + Sync {
    /// 获取值，不存在或已过期时返回 `None`
    async fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// 批量获取值，只返回存在的 ID
    async fn fetch_multiple(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, StorageError> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(bytes) = self.fetch(id).await? {
                found.insert(id.clone(), bytes);
            }
        }
        Ok(found)
    }

    /// 是否存在
    async fn has(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.fetch(id).await?.is_some())
    }

    /// 保存值
    ///
    /// `ttl` 为 `None` 表示永不过期。
    async fn save(&self, id: &str, bytes: &[u8], ttl: Option<Duration>)
        -> Result<(), StorageError>;

    /// 批量保存
    ///
    /// # 返回
    /// 保存失败的 ID 列表
    async fn save_multiple(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Option<Duration>,
    ) -> Result<Vec<String>, StorageError> {
        let mut failed = Vec::new();
        for (id, bytes) in entries {
            if let Err(e) = self.save(id, bytes, ttl).await {
                trace!("批量保存 {} 失败: {}", id, e);
                failed.push(id.clone());
            }
        }
        Ok(failed)
    }

    /// 删除值，ID 不存在时同样成功
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// 批量删除
    async fn delete_multiple(&self, ids: &[String]) -> Result<(), StorageError> {
        for id in ids {
            self.delete(id).await?;
        }
        Ok(())
    }

    /// 删除所有以 `prefix` 开头的 ID，空前缀表示全部
    async fn clear(&self, prefix: &str) -> Result<(), StorageError>;

    /// 原子递增计数器
    ///
    /// 计数器不存在时先创建为 `seed` 再加 `delta`，返回新值。
    /// `delta == 0` 即原子的“读取或初始化”。
    async fn increment_seeded(
        &self,
        id: &str,
        delta: u64,
        seed: u64,
    ) -> Result<u64, StorageError>;

    /// 原子递增计数器，不存在时从 0 开始
    async fn increment(&self, id: &str, delta: u64) -> Result<u64, StorageError> {
        self.increment_seeded(id, delta, 0).await
    }

    /// 后端允许的最大 ID 长度
    fn max_id_length(&self) -> Option<usize> {
        None
    }

    /// 清理能力
    fn as_pruneable(&self) -> Option<&dyn PruneableStorage> {
        None
    }
}

/// 可清理过期条目的存储
#[async_trait]
pub trait PruneableStorage: Send + Sync {
    /// 删除已过期的条目
    ///
    /// # 返回
    /// 删除的条目数量
    async fn prune(&self) -> Result<u64, StorageError>;
}

/// 解析以 ASCII 十进制保存的计数器
pub(crate) fn parse_counter(id: &str, bytes: &[u8]) -> Result<u64, StorageError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| StorageError::Corrupted(format!("计数器 {} 不是十进制数字", id)))
}

/// 新建版本计数器使用的初始值
///
/// 取当前 Unix 微秒数。计数器丢失（被淘汰或清除）后重建时，
/// 新值大于此前发出的任何版本，旧快照不会因此重新生效。
pub fn counter_seed() -> u64 {
    u64::try_from(Utc::now().timestamp_micros())
        .unwrap_or(1)
        .max(1)
}

/// 编码计数器
pub(crate) fn encode_counter(value: u64) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// 空存储
///
/// 不保存任何内容，所有写操作都成功，所有读操作都未命中。
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStorage;

impl NullStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for NullStorage {
    async fn fetch(&self, _id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(None)
    }

    async fn has(&self, _id: &str) -> Result<bool, StorageError> {
        Ok(false)
    }

    async fn save(
        &self,
        _id: &str,
        _bytes: &[u8],
        _ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    async fn delete(&self, _id: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn clear(&self, _prefix: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn increment_seeded(
        &self,
        _id: &str,
        delta: u64,
        seed: u64,
    ) -> Result<u64, StorageError> {
        Ok(seed.saturating_add(delta))
    }
}
