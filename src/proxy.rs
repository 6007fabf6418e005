//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 代理缓存池
//!
//! [`ProxyPool`] 把一个只实现了最小接口 [`ForeignPool`] 的外部缓存池包装成完整的
//! [`CacheItemPool`]：
//!
//! - 键按本引擎的规则校验，配置了命名空间时加上 `{namespace}.` 前缀；
//! - 读取结果总是复制到全新的 [`CacheItem`]，调用方拿不到外部条目对象；
//! - 保存时通过 `make_item` 转换为外部条目，没有过期时间的条目套用代理的默认生命周期；
//! - 延迟写入由代理自己缓冲，外部缓存池无需支持；
//! - 外部缓存池支持清理时转发 `prune`。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::item::CacheItem;
use crate::key_codec::validate_key;
use crate::pool::{CacheItemPool, DeferredBuffer, Pruneable};

/// 外部缓存条目
pub trait ForeignItem: Send + Sync {
    fn key(&self) -> &str;

    fn is_hit(&self) -> bool;

    fn value(&self) -> Option<Value>;

    fn expiry(&self) -> Option<DateTime<Utc>>;
}

/// 外部缓存池需要提供的最小接口
#[async_trait]
pub trait ForeignPool: Send + Sync {
    /// 外部条目类型
    type Item: ForeignItem;

    async fn get_item(&self, key: &str) -> Result<Self::Item, CacheError>;

    /// 构造外部条目
    fn make_item(&self, key: &str, value: Value, expiry: Option<DateTime<Utc>>) -> Self::Item;

    async fn save(&self, item: Self::Item) -> bool;

    async fn delete_item(&self, key: &str) -> bool;

    /// 清空，不支持时返回 `None`
    async fn clear(&self) -> Option<bool> {
        None
    }

    fn as_pruneable(&self) -> Option<&dyn Pruneable> {
        None
    }
}

impl ForeignItem for CacheItem {
    fn key(&self) -> &str {
        CacheItem::key(self)
    }

    fn is_hit(&self) -> bool {
        CacheItem::is_hit(self)
    }

    fn value(&self) -> Option<Value> {
        CacheItem::value(self).cloned()
    }

    fn expiry(&self) -> Option<DateTime<Utc>> {
        CacheItem::expiry(self)
    }
}

/// 把任意 [`CacheItemPool`] 适配为 [`ForeignPool`]
pub struct NativePool<P: CacheItemPool + ?Sized> {
    inner: Arc<P>,
}

impl<P: CacheItemPool + ?Sized> NativePool<P> {
    pub fn new(inner: Arc<P>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: CacheItemPool + ?Sized> ForeignPool for NativePool<P> {
    type Item = CacheItem;

    async fn get_item(&self, key: &str) -> Result<CacheItem, CacheError> {
        self.inner.get_item(key).await
    }

    fn make_item(&self, key: &str, value: Value, expiry: Option<DateTime<Utc>>) -> CacheItem {
        let mut item = CacheItem::new(key);
        item.set_value(value).expires_at(expiry);
        item
    }

    async fn save(&self, item: CacheItem) -> bool {
        match self.inner.save(item).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    async fn delete_item(&self, key: &str) -> bool {
        match self.inner.delete_item(key).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    async fn clear(&self) -> Option<bool> {
        Some(self.inner.clear().await)
    }

    fn as_pruneable(&self) -> Option<&dyn Pruneable> {
        self.inner.as_pruneable()
    }
}

/// 代理缓存池
pub struct ProxyPool<F: ForeignPool> {
    pool: F,
    prefix: String,
    default_lifetime: Option<Duration>,
    deferred: Mutex<DeferredBuffer>,
}

impl<F: ForeignPool> ProxyPool<F> {
    pub fn new(pool: F) -> Self {
        Self {
            pool,
            prefix: String::new(),
            default_lifetime: None,
            deferred: Mutex::new(DeferredBuffer::default()),
        }
    }

    /// 设置命名空间，键在外部缓存池中变为 `{namespace}.{key}`
    pub fn with_namespace(mut self, namespace: &str) -> Result<Self, CacheError> {
        self.prefix = if namespace.is_empty() {
            String::new()
        } else {
            validate_key(namespace)
                .map_err(|e| CacheError::InvalidConfiguration(e.to_string()))?;
            format!("{}.", namespace)
        };
        Ok(self)
    }

    /// 设置默认生命周期
    pub fn with_default_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.default_lifetime = lifetime;
        self
    }

    /// 被包装的外部缓存池
    pub fn inner(&self) -> &F {
        &self.pool
    }

    fn foreign_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn buffered_hit(&self, key: &str) -> Option<CacheItem> {
        self.deferred
            .lock()
            .get(key)
            .filter(|item| !item.is_expired())
            .map(CacheItem::as_buffered_hit)
    }

    /// 复制外部条目为全新的 [`CacheItem`]
    ///
    /// 外部缓存池报告命中但过期时间已到时按未命中处理。
    fn translate(key: &str, foreign: &F::Item) -> CacheItem {
        let expiry = foreign.expiry();
        if matches!(expiry, Some(expiry) if expiry <= Utc::now()) {
            return CacheItem::new(key);
        }
        match foreign.value() {
            Some(value) if foreign.is_hit() => CacheItem::hit(key, value, expiry, BTreeMap::new()),
            _ => CacheItem::new(key),
        }
    }

    /// 写入外部缓存池
    async fn forward(&self, item: CacheItem) -> bool {
        let expiry = item.expiry().or_else(|| {
            self.default_lifetime.and_then(|lifetime| {
                chrono::Duration::from_std(lifetime)
                    .ok()
                    .and_then(|delta| Utc::now().checked_add_signed(delta))
            })
        });
        let key = self.foreign_key(item.key());

        if matches!(expiry, Some(expiry) if expiry <= Utc::now()) {
            return self.pool.delete_item(&key).await;
        }

        let foreign = self.pool.make_item(&key, item.stored_value(), expiry);
        self.pool.save(foreign).await
    }
}

#[async_trait]
impl<F: ForeignPool> CacheItemPool for ProxyPool<F> {
    async fn get_item(&self, key: &str) -> Result<CacheItem, CacheError> {
        validate_key(key)?;
        if let Some(item) = self.buffered_hit(key) {
            return Ok(item);
        }
        let foreign = self.pool.get_item(&self.foreign_key(key)).await?;
        Ok(Self::translate(key, &foreign))
    }

    async fn get_items(&self, keys: &[&str]) -> Result<Vec<CacheItem>, CacheError> {
        for key in keys {
            validate_key(key)?;
        }
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            items.push(self.get_item(key).await?);
        }
        Ok(items)
    }

    async fn has_item(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get_item(key).await?.is_hit())
    }

    async fn save(&self, item: CacheItem) -> Result<bool, CacheError> {
        validate_key(item.key())?;
        if let Err(e) = item.validate_payload() {
            warn!("{}", e);
            return Ok(false);
        }
        self.deferred.lock().remove(item.key());
        Ok(self.forward(item).await)
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
        let mut ok = true;
        for item in items {
            ok &= self.forward(item).await;
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
        for key in keys {
            self.deferred.lock().remove(key);
            ok &= self.pool.delete_item(&self.foreign_key(key)).await;
        }
        Ok(ok)
    }

    async fn clear(&self) -> bool {
        self.deferred.lock().clear();
        match self.pool.clear().await {
            Some(ok) => ok,
            None => {
                debug!("被代理的缓存池不支持清空");
                false
            }
        }
    }

    fn default_lifetime(&self) -> Option<Duration> {
        self.default_lifetime
    }

    fn as_pruneable(&self) -> Option<&dyn Pruneable> {
        self.pool.as_pruneable().map(|_| self as &dyn Pruneable)
    }
}

#[async_trait]
impl<F: ForeignPool> Pruneable for ProxyPool<F> {
    async fn prune(&self) -> bool {
        match self.pool.as_pruneable() {
            Some(pruneable) => pruneable.prune().await,
            None => false,
        }
    }
}

impl<F: ForeignPool> Drop for ProxyPool<F> {
    fn drop(&mut self) {
        let pending = self.deferred.get_mut().len();
        if pending > 0 {
            warn!("代理缓存池被丢弃时仍有 {} 个未提交的延迟条目，已丢弃", pending);
        }
    }
}
