//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 缓存池核心
//!
//! [`CacheItemPool`] 是所有缓存池（基础池、标签池、链式池、代理池）共同实现的契约，
//! [`CachePool`] 是建立在任意 [`Storage`] 之上的基础实现。
//!
//! # 失败语义
//!
//! - 非法键是调用方的编程错误，返回 `Err(CacheError::InvalidKey)`；
//! - 后端故障只记录日志，读路径表现为未命中，写路径返回 `false`。
//!
//! # 延迟写入
//!
//! `save_deferred` 只写入本实例的缓冲区，`commit` 时批量落盘。
//! 缓冲区中的条目对同一实例的读取可见（视为命中），对其他实例不可见。
//! 丢弃仍有缓冲条目的池不会自动落盘，只记录警告。

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::{CacheError, StorageError};
use crate::item::CacheItem;
use crate::key_codec::{validate_key, KeyCodec};
use crate::marshaller::{JsonMarshaller, Marshaller, StoredRecord};
use crate::namespace::{NamespaceVersion, VersionState};
use crate::storage::Storage;

/// 缓存池契约
#[async_trait]
pub trait CacheItemPool: Send + Sync {
    /// 获取条目，未命中时返回空条目
    async fn get_item(&self, key: &str) -> Result<CacheItem, CacheError>;

    /// 批量获取，按请求顺序每个键返回一个条目
    async fn get_items(&self, keys: &[&str]) -> Result<Vec<CacheItem>, CacheError>;

    /// 是否命中
    async fn has_item(&self, key: &str) -> Result<bool, CacheError>;

    /// 立即保存
    ///
    /// 值无法序列化或后端拒绝时返回 `Ok(false)`。
    async fn save(&self, item: CacheItem) -> Result<bool, CacheError>;

    /// 延迟保存，直到 `commit`
    async fn save_deferred(&self, item: CacheItem) -> Result<bool, CacheError>;

    /// 提交延迟保存的条目，全部成功时返回 `true`；无论结果如何缓冲区都会清空
    async fn commit(&self) -> bool;

    /// 删除条目（幂等）
    async fn delete_item(&self, key: &str) -> Result<bool, CacheError>;

    /// 批量删除
    async fn delete_items(&self, keys: &[&str]) -> Result<bool, CacheError>;

    /// 清空本命名空间
    async fn clear(&self) -> bool;

    /// 默认生命周期
    fn default_lifetime(&self) -> Option<Duration> {
        None
    }

    /// 清理能力
    fn as_pruneable(&self) -> Option<&dyn Pruneable> {
        None
    }
}

/// 可清理过期条目的缓存池
#[async_trait]
pub trait Pruneable: Send + Sync {
    /// 物理删除已过期的条目，操作无错误完成时返回 `true`
    async fn prune(&self) -> bool;
}

/// 延迟写入缓冲区
///
/// 按逻辑键去重（后写覆盖），保留首次写入的顺序。
#[derive(Debug, Default)]
pub(crate) struct DeferredBuffer {
    order: Vec<String>,
    items: AHashMap<String, CacheItem>,
}

impl DeferredBuffer {
    pub(crate) fn insert(&mut self, item: CacheItem) {
        if !self.items.contains_key(item.key()) {
            self.order.push(item.key().to_string());
        }
        self.items.insert(item.key().to_string(), item);
    }

    pub(crate) fn get(&self, key: &str) -> Option<&CacheItem> {
        self.items.get(key)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<CacheItem> {
        let removed = self.items.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    pub(crate) fn take_all(&mut self) -> Vec<CacheItem> {
        let mut items = std::mem::take(&mut self.items);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|key| items.remove(&key))
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.items.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// 缓存池选项
#[derive(Clone)]
pub struct PoolOptions {
    /// 命名空间（空字符串使用默认命名空间）
    pub namespace: String,
    /// 默认生命周期，条目未设置过期时间时使用
    pub default_lifetime: Option<Duration>,
    /// 是否启用版本化清空
    pub versioning: bool,
    /// 记录编解码器
    pub marshaller: Arc<dyn Marshaller>,
}

impl std::fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolOptions")
            .field("namespace", &self.namespace)
            .field("default_lifetime", &self.default_lifetime)
            .field("versioning", &self.versioning)
            .finish_non_exhaustive()
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            default_lifetime: None,
            versioning: false,
            marshaller: Arc::new(JsonMarshaller),
        }
    }
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn default_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.default_lifetime = lifetime;
        self
    }

    pub fn versioning(mut self, versioning: bool) -> Self {
        self.versioning = versioning;
        self
    }

    pub fn marshaller(mut self, marshaller: Arc<dyn Marshaller>) -> Self {
        self.marshaller = marshaller;
        self
    }
}

/// 剩余时间取整到毫秒，便于按 TTL 分组
fn whole_millis(duration: Duration) -> Duration {
    Duration::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// 基础缓存池
pub struct CachePool {
    storage: Arc<dyn Storage>,
    codec: KeyCodec,
    default_lifetime: Option<Duration>,
    marshaller: Arc<dyn Marshaller>,
    version: Option<NamespaceVersion>,
    deferred: Mutex<DeferredBuffer>,
}

impl CachePool {
    /// 创建缓存池
    ///
    /// # 错误
    /// 命名空间非法、后端声明的最大ID长度过小或放不下命名空间前缀时返回 `InvalidConfiguration`
    pub fn new(storage: Arc<dyn Storage>, options: PoolOptions) -> Result<Self, CacheError> {
        let mut codec = KeyCodec::new(&options.namespace, storage.max_id_length())?;
        if options.versioning {
            codec = codec.versioned()?;
        }
        let version = options
            .versioning
            .then(|| NamespaceVersion::new(codec.version_meta_id()));

        debug!(
            "创建缓存池: namespace={}, versioning={}, default_lifetime={:?}",
            codec.namespace(),
            options.versioning,
            options.default_lifetime
        );

        Ok(Self {
            storage,
            codec,
            default_lifetime: options.default_lifetime,
            marshaller: options.marshaller,
            version,
            deferred: Mutex::new(DeferredBuffer::default()),
        })
    }

    /// 使用默认选项和给定命名空间创建
    pub fn with_namespace(
        storage: Arc<dyn Storage>,
        namespace: &str,
    ) -> Result<Self, CacheError> {
        Self::new(storage, PoolOptions::new().namespace(namespace))
    }

    pub fn namespace(&self) -> &str {
        self.codec.namespace()
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// 缓冲区中的条目数
    pub fn deferred_len(&self) -> usize {
        self.deferred.lock().len()
    }

    /// 版本状态，未启用版本化时为 `None`
    pub fn version_state(&self) -> Option<VersionState> {
        self.version.as_ref().map(NamespaceVersion::state)
    }

    /// 读路径使用的版本
    async fn read_version(&self) -> Result<Option<u64>, StorageError> {
        match &self.version {
            Some(version) => Ok(Some(version.current(self.storage.as_ref()).await?)),
            None => Ok(None),
        }
    }

    /// 写路径使用的版本（必要时落盘）
    async fn write_version(&self) -> Result<Option<u64>, StorageError> {
        match &self.version {
            Some(version) => Ok(Some(version.ensure_persisted(self.storage.as_ref()).await?)),
            None => Ok(None),
        }
    }

    fn buffered_hit(&self, key: &str) -> Option<CacheItem> {
        self.deferred
            .lock()
            .get(key)
            .filter(|item| !item.is_expired())
            .map(CacheItem::as_buffered_hit)
    }

    /// 解码后端字节；过期或损坏的记录尽力删除并视为未命中
    async fn decode(&self, key: &str, id: &str, bytes: &[u8]) -> CacheItem {
        let record = match self.marshaller.unmarshall(bytes) {
            Ok(record) if !record.is_expired() => record,
            Ok(_) => {
                trace!("记录已过期: {}", id);
                self.discard(id).await;
                return CacheItem::new(key);
            }
            Err(e) => {
                warn!("记录 {} 无法解码，按未命中处理: {}", id, e);
                self.discard(id).await;
                return CacheItem::new(key);
            }
        };

        let expiry = record.expiry_time();
        CacheItem::hit(key, record.value, expiry, record.tags)
    }

    async fn discard(&self, id: &str) {
        if let Err(e) = self.storage.delete(id).await {
            debug!("删除失效记录 {} 失败: {}", id, e);
        }
    }

    /// 将条目编码为后端记录
    ///
    /// # 返回
    /// - `Ok(Some((ttl, bytes)))`: 待写入
    /// - `Ok(None)`: 条目已过期，应删除
    fn encode(&self, item: &CacheItem) -> Result<Option<(Option<Duration>, Vec<u8>)>, CacheError> {
        item.validate_payload()?;

        let (ttl, expiry) = match item.expiry() {
            Some(expiry) => match (expiry - Utc::now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => (Some(whole_millis(remaining)), Some(expiry)),
                _ => return Ok(None),
            },
            None => match self.default_lifetime {
                Some(lifetime) => {
                    let expiry = chrono::Duration::from_std(lifetime)
                        .ok()
                        .and_then(|delta| Utc::now().checked_add_signed(delta));
                    (Some(lifetime), expiry)
                }
                None => (None, None),
            },
        };

        let record = StoredRecord::new(item.stored_value(), expiry)
            .with_tags(item.tag_versions().clone());
        let bytes = self.marshaller.marshall(&record)?;
        Ok(Some((ttl, bytes)))
    }

    /// 写入一批条目
    async fn persist(&self, items: Vec<CacheItem>) -> bool {
        if items.is_empty() {
            return true;
        }

        let version = match self.write_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!("读取命名空间版本失败，放弃写入 {} 个条目: {}", items.len(), e);
                return false;
            }
        };

        let mut ok = true;
        let mut groups: BTreeMap<Option<Duration>, Vec<(String, Vec<u8>)>> = BTreeMap::new();
        let mut expired = Vec::new();

        for item in &items {
            let id = match self.codec.id(item.key(), version) {
                Ok(id) => id,
                Err(e) => {
                    warn!("{}", e);
                    ok = false;
                    continue;
                }
            };
            match self.encode(item) {
                Ok(Some((ttl, bytes))) => groups.entry(ttl).or_default().push((id, bytes)),
                Ok(None) => expired.push(id),
                Err(e) => {
                    warn!("条目 {} 编码失败: {}", item.key(), e);
                    ok = false;
                }
            }
        }

        if !expired.is_empty() {
            trace!("{} 个条目已过期，改为删除", expired.len());
            if let Err(e) = self.storage.delete_multiple(&expired).await {
                warn!("删除已过期条目失败: {}", e);
                ok = false;
            }
        }

        for (ttl, entries) in groups {
            match self.storage.save_multiple(&entries, ttl).await {
                Ok(failed) if failed.is_empty() => {}
                Ok(failed) => {
                    warn!("{} 个条目写入失败: {:?}", failed.len(), failed);
                    ok = false;
                }
                Err(e) => {
                    warn!("批量写入 {} 个条目失败: {}", entries.len(), e);
                    ok = false;
                }
            }
        }

        ok
    }
}

#[async_trait]
impl CacheItemPool for CachePool {
    async fn get_item(&self, key: &str) -> Result<CacheItem, CacheError> {
        validate_key(key)?;
        if let Some(item) = self.buffered_hit(key) {
            return Ok(item);
        }

        let version = match self.read_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!("读取命名空间版本失败，按未命中处理: {}", e);
                return Ok(CacheItem::new(key));
            }
        };
        let id = self.codec.id(key, version)?;

        match self.storage.fetch(&id).await {
            Ok(Some(bytes)) => Ok(self.decode(key, &id, &bytes).await),
            Ok(None) => Ok(CacheItem::new(key)),
            Err(e) => {
                warn!("读取 {} 失败，按未命中处理: {}", id, e);
                Ok(CacheItem::new(key))
            }
        }
    }

    async fn get_items(&self, keys: &[&str]) -> Result<Vec<CacheItem>, CacheError> {
        for key in keys {
            validate_key(key)?;
        }

        let mut results: Vec<Option<CacheItem>> =
            keys.iter().map(|key| self.buffered_hit(key)).collect();
        if results.iter().all(Option::is_some) {
            return Ok(results.into_iter().flatten().collect());
        }

        let version = match self.read_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!("读取命名空间版本失败，按未命中处理: {}", e);
                return Ok(keys.iter().map(|key| CacheItem::new(*key)).collect());
            }
        };

        let mut pending = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            if results[index].is_none() {
                pending.push((index, self.codec.id(key, version)?));
            }
        }

        let ids: Vec<String> = pending.iter().map(|(_, id)| id.clone()).collect();
        let found = match self.storage.fetch_multiple(&ids).await {
            Ok(found) => found,
            Err(e) => {
                warn!("批量读取 {} 个条目失败，按未命中处理: {}", ids.len(), e);
                Default::default()
            }
        };

        for (index, id) in pending {
            let key = keys[index];
            let item = match found.get(&id) {
                Some(bytes) => self.decode(key, &id, bytes).await,
                None => CacheItem::new(key),
            };
            results[index] = Some(item);
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn has_item(&self, key: &str) -> Result<bool, CacheError> {
        validate_key(key)?;
        if self.buffered_hit(key).is_some() {
            return Ok(true);
        }

        let version = match self.read_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!("读取命名空间版本失败: {}", e);
                return Ok(false);
            }
        };
        let id = self.codec.id(key, version)?;
        match self.storage.has(&id).await {
            Ok(exists) => Ok(exists),
            Err(e) => {
                warn!("检查 {} 失败: {}", id, e);
                Ok(false)
            }
        }
    }

    async fn save(&self, item: CacheItem) -> Result<bool, CacheError> {
        validate_key(item.key())?;
        if let Err(e) = item.validate_payload() {
            warn!("{}", e);
            return Ok(false);
        }
        self.deferred.lock().remove(item.key());
        Ok(self.persist(vec![item]).await)
    }

    async fn save_deferred(&self, item: CacheItem) -> Result<bool, CacheError> {
        validate_key(item.key())?;
        if let Err(e) = item.validate_payload() {
            warn!("{}", e);
            return Ok(false);
        }
        self.deferred.lock().insert(item);
        Ok(true)
    }

    async fn commit(&self) -> bool {
        let items = self.deferred.lock().take_all();
        if items.is_empty() {
            return true;
        }
        debug!("提交 {} 个延迟条目", items.len());
        self.persist(items).await
    }

    async fn delete_item(&self, key: &str) -> Result<bool, CacheError> {
        self.delete_items(&[key]).await
    }

    async fn delete_items(&self, keys: &[&str]) -> Result<bool, CacheError> {
        for key in keys {
            validate_key(key)?;
        }
        {
            let mut deferred = self.deferred.lock();
            for key in keys {
                deferred.remove(key);
            }
        }
        if keys.is_empty() {
            return Ok(true);
        }

        let version = match self.read_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!("读取命名空间版本失败，无法删除: {}", e);
                return Ok(false);
            }
        };
        let ids = keys
            .iter()
            .map(|key| self.codec.id(key, version))
            .collect::<Result<Vec<_>, _>>()?;

        match self.storage.delete_multiple(&ids).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("删除 {} 个条目失败: {}", ids.len(), e);
                Ok(false)
            }
        }
    }

    async fn clear(&self) -> bool {
        self.deferred.lock().clear();

        let result = match &self.version {
            Some(version) => version.bump(self.storage.as_ref()).await.map(|_| ()),
            None => self.storage.clear(&self.codec.prefix()).await,
        };
        match result {
            Ok(()) => {
                debug!("命名空间 {} 已清空", self.codec.namespace());
                true
            }
            Err(e) => {
                warn!("清空命名空间 {} 失败: {}", self.codec.namespace(), e);
                false
            }
        }
    }

    fn default_lifetime(&self) -> Option<Duration> {
        self.default_lifetime
    }

    fn as_pruneable(&self) -> Option<&dyn Pruneable> {
        self.storage.as_pruneable().map(|_| self as &dyn Pruneable)
    }
}

#[async_trait]
impl Pruneable for CachePool {
    async fn prune(&self) -> bool {
        let Some(pruneable) = self.storage.as_pruneable() else {
            return false;
        };
        match pruneable.prune().await {
            Ok(removed) => {
                debug!("命名空间 {} 清理了 {} 个过期条目", self.codec.namespace(), removed);
                true
            }
            Err(e) => {
                warn!("清理过期条目失败: {}", e);
                false
            }
        }
    }
}

impl Drop for CachePool {
    fn drop(&mut self) {
        let pending = self.deferred.get_mut().len();
        if pending > 0 {
            warn!(
                "缓存池 {} 被丢弃时仍有 {} 个未提交的延迟条目，已丢弃",
                self.codec.namespace(),
                pending
            );
        }
    }
}
