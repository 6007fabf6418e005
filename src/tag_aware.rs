//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 标签失效
//!
//! [`TagAwarePool`] 包装任意 [`CacheItemPool`]，为每个标签在独立的存储中维护一个版本计数器：
//!
//! - 保存带标签的条目时，读取（或初始化）每个标签的当前版本，快照随记录一起保存；
//! - `invalidate_tags` 只把对应计数器加一，不遍历、不改写任何条目；
//! - 读取时比对快照与当前版本，不一致即视为未命中，并尽力删除该记录。
//!
//! 标签计数器缺失（例如被后端淘汰）时的处理由 [`MissingTagPolicy`] 决定。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::{CacheError, StorageError};
use crate::item::CacheItem;
use crate::key_codec::{validate_key, KeyCodec};
use crate::pool::{CacheItemPool, DeferredBuffer, Pruneable};
use crate::storage::{counter_seed, parse_counter, Storage};

/// 标签计数器缺失时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTagPolicy {
    /// 视为有效，直到该标签再次失效
    #[default]
    FailOpen,
    /// 视为已失效
    FailClosed,
}

/// 支持标签失效的缓存池
pub struct TagAwarePool {
    pool: Arc<dyn CacheItemPool>,
    tags: Arc<dyn Storage>,
    codec: KeyCodec,
    policy: MissingTagPolicy,
    deferred: Mutex<DeferredBuffer>,
}

impl TagAwarePool {
    /// 创建标签池
    ///
    /// # 参数
    /// - `pool`: 保存条目的缓存池
    /// - `tags`: 保存标签计数器的存储（可以与条目共用同一后端）
    /// - `namespace`: 标签计数器的命名空间
    pub fn new(
        pool: Arc<dyn CacheItemPool>,
        tags: Arc<dyn Storage>,
        namespace: &str,
    ) -> Result<Self, CacheError> {
        let codec = KeyCodec::new(namespace, tags.max_id_length())?.for_tags()?;
        Ok(Self {
            pool,
            tags,
            codec,
            policy: MissingTagPolicy::default(),
            deferred: Mutex::new(DeferredBuffer::default()),
        })
    }

    /// 设置标签计数器缺失时的策略
    pub fn with_missing_tag_policy(mut self, policy: MissingTagPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn missing_tag_policy(&self) -> MissingTagPolicy {
        self.policy
    }

    /// 被包装的缓存池
    pub fn inner(&self) -> &Arc<dyn CacheItemPool> {
        &self.pool
    }

    /// 使标签失效
    ///
    /// 先提交本实例的延迟条目，使其与此前的写入一样受本次失效影响。
    ///
    /// # 返回
    /// - `Ok(true)`: 所有标签的计数器都已推进
    /// - `Ok(false)`: 部分标签推进失败
    /// - `Err(CacheError::InvalidKey)`: 标签名非法
    pub async fn invalidate_tags(&self, tags: &[&str]) -> Result<bool, CacheError> {
        let ids = tags
            .iter()
            .map(|tag| self.codec.tag_id(tag))
            .collect::<Result<Vec<_>, _>>()?;

        let mut ok = self.commit().await;
        for (tag, id) in tags.iter().zip(&ids) {
            match self.tags.increment_seeded(id, 1, counter_seed()).await {
                Ok(version) => trace!("标签 {} 推进到版本 {}", tag, version),
                Err(e) => {
                    warn!("标签 {} 失效失败: {}", tag, e);
                    ok = false;
                }
            }
        }
        debug!("使 {} 个标签失效, 成功={}", tags.len(), ok);
        Ok(ok)
    }

    /// 读取或初始化标签的当前版本
    async fn snapshot(
        &self,
        tags: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, u64>, StorageError> {
        let mut snapshot = BTreeMap::new();
        for tag in tags {
            let id = self
                .codec
                .tag_id(tag)
                .map_err(|e| StorageError::QueryError(e.to_string()))?;
            let version = self.tags.increment_seeded(&id, 0, counter_seed()).await?;
            snapshot.insert(tag.clone(), version);
        }
        Ok(snapshot)
    }

    /// 校验命中条目的标签快照，过期的条目转为未命中并尽力删除
    async fn validate(&self, items: Vec<CacheItem>) -> Vec<CacheItem> {
        let tags: BTreeSet<String> = items
            .iter()
            .filter(|item| item.is_hit())
            .flat_map(|item| item.tag_versions().keys().cloned())
            .collect();
        if tags.is_empty() {
            return items;
        }

        let mut ids = Vec::with_capacity(tags.len());
        for tag in tags {
            match self.codec.tag_id(&tag) {
                Ok(id) => ids.push((tag, id)),
                Err(e) => warn!("快照中的标签 {} 非法: {}", tag, e),
            }
        }
        let lookup: Vec<String> = ids.iter().map(|(_, id)| id.clone()).collect();

        let current: Option<BTreeMap<String, Option<u64>>> =
            match self.tags.fetch_multiple(&lookup).await {
                Ok(found) => Some(
                    ids.into_iter()
                        .map(|(tag, id)| {
                            let parsed = found.get(&id).map(|bytes| parse_counter(&id, bytes));
                            let version = match parsed {
                                Some(Ok(version)) => Some(version),
                                // 损坏的计数器一律视为已失效
                                Some(Err(_)) => Some(u64::MAX),
                                None => None,
                            };
                            (tag, version)
                        })
                        .collect(),
                ),
                Err(e) => {
                    warn!("读取标签版本失败，带标签的条目按未命中处理: {}", e);
                    None
                }
            };

        let mut stale = Vec::new();
        let items: Vec<CacheItem> = items
            .into_iter()
            .map(|item| {
                if !item.is_hit() || item.tag_versions().is_empty() {
                    return item;
                }
                let fresh = match &current {
                    Some(current) => item.tag_versions().iter().all(|(tag, saved)| {
                        match current.get(tag).copied().flatten() {
                            Some(version) => version == *saved,
                            None => self.policy == MissingTagPolicy::FailOpen,
                        }
                    }),
                    None => false,
                };
                if fresh {
                    item
                } else {
                    // 后端故障时不删除，只有确认过期的记录才清理
                    if current.is_some() {
                        stale.push(item.key().to_string());
                    }
                    item.into_miss()
                }
            })
            .collect();

        if !stale.is_empty() {
            trace!("删除 {} 个标签已失效的条目", stale.len());
            let keys: Vec<&str> = stale.iter().map(String::as_str).collect();
            if let Err(e) = self.pool.delete_items(&keys).await {
                debug!("删除失效条目失败: {}", e);
            }
        }

        items
    }

    fn buffered_hit(&self, key: &str) -> Option<CacheItem> {
        self.deferred
            .lock()
            .get(key)
            .filter(|item| !item.is_expired())
            .map(CacheItem::as_buffered_hit)
    }
}

#[async_trait]
impl CacheItemPool for TagAwarePool {
    async fn get_item(&self, key: &str) -> Result<CacheItem, CacheError> {
        validate_key(key)?;
        if let Some(item) = self.buffered_hit(key) {
            return Ok(item);
        }
        let item = self.pool.get_item(key).await?;
        let mut validated = self.validate(vec![item]).await;
        Ok(validated.pop().unwrap_or_else(|| CacheItem::new(key)))
    }

    async fn get_items(&self, keys: &[&str]) -> Result<Vec<CacheItem>, CacheError> {
        for key in keys {
            validate_key(key)?;
        }

        let mut results: Vec<Option<CacheItem>> =
            keys.iter().map(|key| self.buffered_hit(key)).collect();
        let pending: Vec<&str> = keys
            .iter()
            .zip(&results)
            .filter(|(_, item)| item.is_none())
            .map(|(key, _)| *key)
            .collect();

        if !pending.is_empty() {
            let fetched = self.validate(self.pool.get_items(&pending).await?).await;
            let mut fetched = fetched.into_iter();
            for slot in results.iter_mut().filter(|slot| slot.is_none()) {
                *slot = fetched.next();
            }
        }

        Ok(results
            .into_iter()
            .zip(keys)
            .map(|(item, key)| item.unwrap_or_else(|| CacheItem::new(*key)))
            .collect())
    }

    async fn has_item(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get_item(key).await?.is_hit())
    }

    async fn save(&self, mut item: CacheItem) -> Result<bool, CacheError> {
        validate_key(item.key())?;
        if let Err(e) = item.validate_payload() {
            warn!("{}", e);
            return Ok(false);
        }
        self.deferred.lock().remove(item.key());

        match self.snapshot(item.tags()).await {
            Ok(snapshot) => item.set_tag_versions(snapshot),
            Err(e) => {
                warn!("读取标签版本失败，放弃保存 {}: {}", item.key(), e);
                return Ok(false);
            }
        }
        self.pool.save(item).await
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

        let all_tags: BTreeSet<String> = items
            .iter()
            .flat_map(|item| item.tags().iter().cloned())
            .collect();
        let versions = match self.snapshot(&all_tags).await {
            Ok(versions) => versions,
            Err(e) => {
                warn!("读取标签版本失败，放弃提交 {} 个条目: {}", items.len(), e);
                return false;
            }
        };

        let mut ok = true;
        for mut item in items {
            let snapshot = item
                .tags()
                .iter()
                .filter_map(|tag| versions.get(tag).map(|v| (tag.clone(), *v)))
                .collect();
            item.set_tag_versions(snapshot);
            match self.pool.save_deferred(item).await {
                Ok(true) => {}
                Ok(false) => ok = false,
                Err(e) => {
                    warn!("{}", e);
                    ok = false;
                }
            }
        }
        self.pool.commit().await && ok
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
        self.pool.delete_items(keys).await
    }

    async fn clear(&self) -> bool {
        self.deferred.lock().clear();
        self.pool.clear().await
    }

    fn default_lifetime(&self) -> Option<Duration> {
        self.pool.default_lifetime()
    }

    fn as_pruneable(&self) -> Option<&dyn Pruneable> {
        self.pool.as_pruneable().map(|_| self as &dyn Pruneable)
    }
}

#[async_trait]
impl Pruneable for TagAwarePool {
    async fn prune(&self) -> bool {
        match self.pool.as_pruneable() {
            Some(pruneable) => pruneable.prune().await,
            None => false,
        }
    }
}

impl Drop for TagAwarePool {
    fn drop(&mut self) {
        let pending = self.deferred.get_mut().len();
        if pending > 0 {
            warn!("标签池被丢弃时仍有 {} 个未提交的延迟条目，已丢弃", pending);
        }
    }
}
