//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 链式缓存池
//!
//! 按顺序组合多个缓存池（通常由快到慢）：
//!
//! - 读取依次查询各层，首个命中的层返回结果，并把条目回填到它之前的所有层；
//! - 回填的过期时间取「源层剩余生命周期、目标层默认生命周期、链默认生命周期」中的最小值；
//! - 写入、删除、提交和清空作用于所有层，结果为各层结果的逻辑与（不短路）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::CacheError;
use crate::item::CacheItem;
use crate::key_codec::validate_key;
use crate::pool::{CacheItemPool, Pruneable};

/// 链统计信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainStats {
    /// 各层命中次数
    pub level_hits: Vec<u64>,
    /// 所有层均未命中的次数
    pub misses: u64,
    /// 回填次数
    pub promotions: u64,
}

impl ChainStats {
    fn with_levels(levels: usize) -> Self {
        Self {
            level_hits: vec![0; levels],
            ..Default::default()
        }
    }

    /// 总命中次数
    pub fn hits(&self) -> u64 {
        self.level_hits.iter().sum()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

/// 取 `lifetime` 之后的绝对时间
fn after(lifetime: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(lifetime)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
}

/// 链式缓存池
pub struct ChainPool {
    pools: Vec<Arc<dyn CacheItemPool>>,
    default_lifetime: Option<Duration>,
    stats: RwLock<ChainStats>,
}

impl ChainPool {
    /// 创建链式缓存池
    ///
    /// # 错误
    /// 缓存池列表为空时返回 `InvalidConfiguration`
    pub fn new(pools: Vec<Arc<dyn CacheItemPool>>) -> Result<Self, CacheError> {
        if pools.is_empty() {
            return Err(CacheError::InvalidConfiguration(
                "链式缓存池至少需要一个缓存池".to_string(),
            ));
        }
        debug!("创建链式缓存池, 层数: {}", pools.len());
        let levels = pools.len();
        Ok(Self {
            pools,
            default_lifetime: None,
            stats: RwLock::new(ChainStats::with_levels(levels)),
        })
    }

    /// 设置链默认生命周期（限制回填的过期时间）
    pub fn with_default_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.default_lifetime = lifetime;
        self
    }

    /// 层数
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// 获取统计信息
    pub fn stats(&self) -> ChainStats {
        self.stats.read().clone()
    }

    /// 重置统计信息
    pub fn reset_stats(&self) {
        *self.stats.write() = ChainStats::with_levels(self.pools.len());
    }

    /// 计算回填到 `target` 层的条目，源条目已过期时返回 `None`
    fn promoted(&self, item: &CacheItem, target: &dyn CacheItemPool) -> Option<CacheItem> {
        if item.is_expired() {
            return None;
        }
        let expiry = [
            item.expiry(),
            target.default_lifetime().and_then(after),
            self.default_lifetime.and_then(after),
        ]
        .into_iter()
        .flatten()
        .min();

        let mut promoted = item.clone();
        promoted.expires_at(expiry);
        Some(promoted)
    }

    /// 把 `level` 层命中的条目回填到之前的所有层
    async fn promote(&self, item: &CacheItem, level: usize) {
        for (upper, pool) in self.pools[..level].iter().enumerate() {
            let Some(promoted) = self.promoted(item, pool.as_ref()) else {
                return;
            };
            match pool.save(promoted).await {
                Ok(true) => {
                    trace!("条目 {} 从第 {} 层回填到第 {} 层", item.key(), level, upper);
                    self.stats.write().promotions += 1;
                }
                Ok(false) => warn!("条目 {} 回填到第 {} 层失败", item.key(), upper),
                Err(e) => warn!("条目 {} 回填失败: {}", item.key(), e),
            }
        }
    }

    fn record_hit(&self, level: usize) {
        if let Some(hits) = self.stats.write().level_hits.get_mut(level) {
            *hits += 1;
        }
    }
}

#[async_trait]
impl CacheItemPool for ChainPool {
    async fn get_item(&self, key: &str) -> Result<CacheItem, CacheError> {
        validate_key(key)?;
        for (level, pool) in self.pools.iter().enumerate() {
            let item = pool.get_item(key).await?;
            if item.is_hit() {
                self.record_hit(level);
                self.promote(&item, level).await;
                return Ok(item);
            }
        }
        self.stats.write().misses += 1;
        Ok(CacheItem::new(key))
    }

    async fn get_items(&self, keys: &[&str]) -> Result<Vec<CacheItem>, CacheError> {
        for key in keys {
            validate_key(key)?;
        }

        let mut results: Vec<Option<CacheItem>> = vec![None; keys.len()];
        for (level, pool) in self.pools.iter().enumerate() {
            let missing: Vec<usize> = (0..keys.len())
                .filter(|i| results[*i].is_none())
                .collect();
            if missing.is_empty() {
                break;
            }
            let wanted: Vec<&str> = missing.iter().map(|i| keys[*i]).collect();
            let items = pool.get_items(&wanted).await?;

            for (index, item) in missing.into_iter().zip(items) {
                if item.is_hit() {
                    self.record_hit(level);
                    self.promote(&item, level).await;
                    results[index] = Some(item);
                }
            }
        }

        Ok(results
            .into_iter()
            .zip(keys)
            .map(|(item, key)| {
                item.unwrap_or_else(|| {
                    self.stats.write().misses += 1;
                    CacheItem::new(*key)
                })
            })
            .collect())
    }

    async fn has_item(&self, key: &str) -> Result<bool, CacheError> {
        validate_key(key)?;
        for pool in &self.pools {
            if pool.has_item(key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn save(&self, item: CacheItem) -> Result<bool, CacheError> {
        validate_key(item.key())?;
        let mut ok = true;
        for pool in &self.pools {
            ok &= pool.save(item.clone()).await?;
        }
        Ok(ok)
    }

    async fn save_deferred(&self, item: CacheItem) -> Result<bool, CacheError> {
        validate_key(item.key())?;
        let mut ok = true;
        for pool in &self.pools {
            ok &= pool.save_deferred(item.clone()).await?;
        }
        Ok(ok)
    }

    async fn commit(&self) -> bool {
        let mut ok = true;
        for pool in &self.pools {
            ok &= pool.commit().await;
        }
        ok
    }

    async fn delete_item(&self, key: &str) -> Result<bool, CacheError> {
        self.delete_items(&[key]).await
    }

    async fn delete_items(&self, keys: &[&str]) -> Result<bool, CacheError> {
        for key in keys {
            validate_key(key)?;
        }
        let mut ok = true;
        for pool in &self.pools {
            ok &= pool.delete_items(keys).await?;
        }
        Ok(ok)
    }

    async fn clear(&self) -> bool {
        let mut ok = true;
        for pool in &self.pools {
            ok &= pool.clear().await;
        }
        ok
    }

    fn default_lifetime(&self) -> Option<Duration> {
        self.default_lifetime
    }

    fn as_pruneable(&self) -> Option<&dyn Pruneable> {
        Some(self)
    }
}

#[async_trait]
impl Pruneable for ChainPool {
    async fn prune(&self) -> bool {
        let mut ok = true;
        for pool in &self.pools {
            if let Some(pruneable) = pool.as_pruneable() {
                ok &= pruneable.prune().await;
            }
        }
        ok
    }
}
