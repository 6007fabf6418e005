//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 文件系统存储实现
//!
//! 每个 ID 对应一个文件，路径为 `directory/xx/yy/<hash>`，
//! 文件内容为 `过期时间(Unix毫秒, 0表示永不过期)\nID字节长度\nID载荷`，
//! ID 不带分隔符，按长度切分。
//!
//! 写入先落到同目录下的临时文件再 `rename`，读者不会看到写了一半的文件。
//! 计数器递增在进程内通过按 ID 的异步互斥锁保证原子性，跨进程只能尽力而为。

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::constants::FILESYSTEM_MAX_ID_LENGTH;
use crate::error::{CacheError, StorageError};
use crate::storage::{encode_counter, parse_counter, PruneableStorage, Storage};

/// 临时文件前缀，扫描时跳过
const TEMP_PREFIX: &str = ".tmp-";

/// 文件系统存储配置
#[derive(Debug, Clone)]
pub struct FilesystemStorageConfig {
    /// 根目录
    pub directory: PathBuf,
}

impl FilesystemStorageConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.directory.as_os_str().is_empty() {
            return Err("文件系统存储目录不能为空".to_string());
        }
        Ok(())
    }
}

/// 解码后的文件
struct CacheFile {
    expires_at_millis: i64,
    id: String,
    payload: Vec<u8>,
}

impl CacheFile {
    fn encode(id: &str, payload: &[u8], ttl: Option<Duration>) -> Vec<u8> {
        let expires_at_millis = ttl
            .and_then(|ttl| i64::try_from(ttl.as_millis()).ok())
            .and_then(|millis| Utc::now().timestamp_millis().checked_add(millis))
            .unwrap_or(0);
        let mut bytes = Vec::with_capacity(payload.len() + id.len() + 32);
        bytes.extend_from_slice(expires_at_millis.to_string().as_bytes());
        bytes.push(b'\n');
        // ID 可能含换行，按长度前缀保存
        bytes.extend_from_slice(id.len().to_string().as_bytes());
        bytes.push(b'\n');
        bytes.extend_from_slice(id.as_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    fn decode(bytes: Vec<u8>) -> Option<Self> {
        let first = bytes.iter().position(|b| *b == b'\n')?;
        let second = first + 1 + bytes[first + 1..].iter().position(|b| *b == b'\n')?;
        let expires_at_millis = std::str::from_utf8(&bytes[..first]).ok()?.parse().ok()?;
        let id_len: usize = std::str::from_utf8(&bytes[first + 1..second])
            .ok()?
            .parse()
            .ok()?;
        let id_end = (second + 1).checked_add(id_len)?;
        let id = std::str::from_utf8(bytes.get(second + 1..id_end)?)
            .ok()?
            .to_string();
        let payload = bytes[id_end..].to_vec();
        Some(Self {
            expires_at_millis,
            id,
            payload,
        })
    }

    fn is_expired(&self) -> bool {
        self.expires_at_millis != 0 && self.expires_at_millis <= Utc::now().timestamp_millis()
    }
}

/// 文件系统存储
pub struct FilesystemStorage {
    directory: PathBuf,
    /// 按 ID 的递增锁
    counter_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FilesystemStorage {
    /// 创建文件系统存储，目录不存在时自动创建
    pub async fn new(config: FilesystemStorageConfig) -> Result<Self, CacheError> {
        config.validate().map_err(CacheError::InvalidConfiguration)?;
        tokio::fs::create_dir_all(&config.directory)
            .await
            .map_err(StorageError::from)?;
        debug!("文件系统存储目录: {}", config.directory.display());

        Ok(Self {
            directory: config.directory,
            counter_locks: DashMap::new(),
        })
    }

    /// 根目录
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let hash = URL_SAFE_NO_PAD.encode(Sha256::digest(id.as_bytes()));
        self.directory
            .join(&hash[0..2])
            .join(&hash[2..4])
            .join(&hash)
    }

    async fn read_file(path: &Path) -> Result<Option<CacheFile>, StorageError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(CacheFile::decode(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(path: &Path) -> Result<(), StorageError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, id: &str, contents: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path_for(id);
        let parent = path.parent().unwrap_or(&self.directory);
        tokio::fs::create_dir_all(parent).await?;

        let temp = parent.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&temp, &contents).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// 列出所有缓存文件
    async fn list_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut files = Vec::new();
        let mut pending = vec![self.directory.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                    files.push(entry.path());
                }
            }
        }

        Ok(files)
    }

    fn counter_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.counter_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 没有其他持有者时移除计数器锁
    fn release_counter_lock(&self, id: &str) {
        self.counter_locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// 持有计数器锁时调用
    async fn increment_locked(
        &self,
        id: &str,
        delta: u64,
        seed: u64,
    ) -> Result<u64, StorageError> {
        let (current, exists) = match self.fetch(id).await? {
            Some(bytes) => (parse_counter(id, &bytes)?, true),
            None => (seed, false),
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StorageError::Corrupted(format!("计数器 {} 溢出", id)))?;
        if delta != 0 || !exists {
            self.write_file(id, CacheFile::encode(id, &encode_counter(next), None))
                .await?;
        }
        Ok(next)
    }

    /// 当前持有的计数器锁数量
    pub fn counter_lock_count(&self) -> usize {
        self.counter_locks.len()
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    async fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(id);
        let file = match Self::read_file(&path).await? {
            Some(file) => file,
            None => return Ok(None),
        };

        if file.id != id {
            // 哈希碰撞
            return Ok(None);
        }
        if file.is_expired() {
            trace!("文件已过期，删除 {}", path.display());
            Self::remove_file(&path).await?;
            return Ok(None);
        }
        Ok(Some(file.payload))
    }

    async fn save(
        &self,
        id: &str,
        bytes: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        self.write_file(id, CacheFile::encode(id, bytes, ttl)).await
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        Self::remove_file(&self.path_for(id)).await
    }

    async fn clear(&self, prefix: &str) -> Result<(), StorageError> {
        let mut ok = true;
        for path in self.list_files().await? {
            let matches = if prefix.is_empty() {
                true
            } else {
                match Self::read_file(&path).await {
                    Ok(Some(file)) => file.id.starts_with(prefix),
                    // 无法解析的文件不属于任何命名空间
                    Ok(None) => false,
                    Err(e) => {
                        warn!("读取缓存文件 {} 失败: {}", path.display(), e);
                        ok = false;
                        false
                    }
                }
            };
            if matches {
                if let Err(e) = Self::remove_file(&path).await {
                    warn!("删除缓存文件 {} 失败: {}", path.display(), e);
                    ok = false;
                }
            }
        }

        if ok {
            Ok(())
        } else {
            Err(StorageError::QueryError(format!(
                "部分缓存文件未能清除（前缀 {}）",
                prefix
            )))
        }
    }

    async fn increment_seeded(
        &self,
        id: &str,
        delta: u64,
        seed: u64,
    ) -> Result<u64, StorageError> {
        let lock = self.counter_lock(id);
        let result = {
            let _guard = lock.lock().await;
            self.increment_locked(id, delta, seed).await
        };
        drop(lock);
        self.release_counter_lock(id);
        result
    }

    fn max_id_length(&self) -> Option<usize> {
        Some(FILESYSTEM_MAX_ID_LENGTH)
    }

    fn as_pruneable(&self) -> Option<&dyn PruneableStorage> {
        Some(self)
    }
}

#[async_trait]
impl PruneableStorage for FilesystemStorage {
    async fn prune(&self) -> Result<u64, StorageError> {
        let mut removed = 0;
        for path in self.list_files().await? {
            if let Some(file) = Self::read_file(&path).await? {
                if file.is_expired() {
                    Self::remove_file(&path).await?;
                    removed += 1;
                }
            }
        }
        debug!("文件系统存储清理了 {} 个过期文件", removed);
        Ok(removed)
    }
}
