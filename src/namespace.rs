//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 命名空间版本
//!
//! 开启版本化的缓存池把版本号编进每个后端ID，`clear()` 只需把版本号加一，
//! 旧条目随之不可达，由后端的 TTL 或 prune 回收。
//!
//! 状态转换：
//!
//! ```text
//! Uninitialized --读取到版本记录 / 首次写入--> Loaded { version }
//! Loaded --clear()--> Loaded { version: n + 1 }
//! ```
//!
//! 版本号只通过 `Storage::increment_seeded` 推进，多个实例并发 `clear()` 不会丢失更新。
//! 版本记录不存在时以 [`counter_seed`] 创建，记录丢失后重建的版本不会与旧版本重复，
//! 已清空的条目不会重新可达。后端没有版本记录时读取按版本 0 进行且不缓存，
//! 版本 0 下不会写入任何条目。

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::StorageError;
use crate::storage::{counter_seed, parse_counter, Storage};

/// 版本状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    /// 尚未从后端读取，或后端还没有版本记录
    Uninitialized,
    /// 已确定版本
    Loaded { version: u64 },
}

/// 单个缓存池实例持有的命名空间版本
#[derive(Debug)]
pub struct NamespaceVersion {
    meta_id: String,
    state: Mutex<VersionState>,
}

impl NamespaceVersion {
    pub fn new(meta_id: impl Into<String>) -> Self {
        Self {
            meta_id: meta_id.into(),
            state: Mutex::new(VersionState::Uninitialized),
        }
    }

    /// 版本记录的后端ID
    pub fn meta_id(&self) -> &str {
        &self.meta_id
    }

    pub fn state(&self) -> VersionState {
        *self.state.lock()
    }

    /// 读路径使用的版本
    ///
    /// 后端出错或没有版本记录时状态保持 `Uninitialized`，下次调用重新读取。
    pub async fn current(&self, storage: &dyn Storage) -> Result<u64, StorageError> {
        if let VersionState::Loaded { version } = self.state() {
            return Ok(version);
        }

        match storage.fetch(&self.meta_id).await? {
            Some(bytes) => {
                let version = parse_counter(&self.meta_id, &bytes)?;
                self.adopt(version);
                trace!("命名空间版本 {} -> {}", self.meta_id, version);
                Ok(self.loaded_or(version))
            }
            None => {
                trace!("命名空间版本 {} 尚无记录", self.meta_id);
                Ok(0)
            }
        }
    }

    /// 写路径使用的版本：确保版本记录已存在
    ///
    /// 使用 `increment_seeded(meta, 0, seed)` 原子地创建记录；若其他实例已创建或推进，
    /// 采用后端返回的值。
    pub async fn ensure_persisted(&self, storage: &dyn Storage) -> Result<u64, StorageError> {
        if let VersionState::Loaded { version } = self.state() {
            return Ok(version);
        }

        let actual = storage
            .increment_seeded(&self.meta_id, 0, counter_seed())
            .await?;
        debug!("命名空间版本 {} 已落盘: {}", self.meta_id, actual);
        self.adopt(actual);
        Ok(self.loaded_or(actual))
    }

    /// 推进版本
    pub async fn bump(&self, storage: &dyn Storage) -> Result<u64, StorageError> {
        let version = storage
            .increment_seeded(&self.meta_id, 1, counter_seed())
            .await?;
        self.adopt(version);
        debug!("命名空间版本 {} 推进到 {}", self.meta_id, version);
        Ok(self.loaded_or(version))
    }

    fn adopt(&self, version: u64) {
        let mut state = self.state.lock();
        // 只允许版本前进
        let version = match *state {
            VersionState::Loaded { version: current } => current.max(version),
            VersionState::Uninitialized => version,
        };
        *state = VersionState::Loaded { version };
    }

    fn loaded_or(&self, fallback: u64) -> u64 {
        match self.state() {
            VersionState::Loaded { version } => version,
            VersionState::Uninitialized => fallback,
        }
    }
}
