//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 缓存条目
//!
//! [`CacheItem`] 是调用方与缓存池交互的值对象：由池在 `get_item` 时创建
//! （命中或未命中），由调用方修改值、过期时间和标签后交回 `save`。

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::error::CacheError;
use crate::key_codec::validate_key;

/// 条目载荷
#[derive(Debug, Clone, PartialEq)]
enum Payload {
    /// 未设置值
    Empty,
    /// 已序列化为 JSON 文档的值
    Value(Value),
    /// 序列化失败的值，保存时会被拒绝
    Invalid(String),
}

/// 缓存条目
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem {
    key: String,
    payload: Payload,
    is_hit: bool,
    expiry: Option<DateTime<Utc>>,
    /// 下次保存时附加的标签
    tags: BTreeSet<String>,
    /// 从后端读取的标签快照 {tag -> version}
    tag_versions: BTreeMap<String, u64>,
}

impl CacheItem {
    /// 创建未命中的空条目
    ///
    /// 键的合法性在交给缓存池时校验。
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: Payload::Empty,
            is_hit: false,
            expiry: None,
            tags: BTreeSet::new(),
            tag_versions: BTreeMap::new(),
        }
    }

    /// 创建带值的条目
    pub fn with_value<T: Serialize>(key: impl Into<String>, value: T) -> Self {
        let mut item = Self::new(key);
        item.set(value);
        item
    }

    /// 由后端记录重建命中条目
    pub(crate) fn hit(
        key: impl Into<String>,
        value: Value,
        expiry: Option<DateTime<Utc>>,
        tag_versions: BTreeMap<String, u64>,
    ) -> Self {
        Self {
            key: key.into(),
            payload: Payload::Value(value),
            is_hit: true,
            expiry,
            tags: BTreeSet::new(),
            tag_versions,
        }
    }

    /// 缓存键
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 是否命中
    pub fn is_hit(&self) -> bool {
        self.is_hit
    }

    /// 获取原始 JSON 值
    pub fn value(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Value(value) => Some(value),
            _ => None,
        }
    }

    /// 获取并反序列化值
    ///
    /// 未命中、未设置值或类型不匹配时返回 `None`。
    pub fn get<T: DeserializeOwned>(&self) -> Option<T> {
        if !self.is_hit {
            return None;
        }
        self.value()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// 设置值
    ///
    /// 序列化失败不会立即报错，而是把条目标记为不可保存，
    /// 由 `save`/`save_deferred` 返回 `false`。
    pub fn set<T: Serialize>(&mut self, value: T) -> &mut Self {
        self.payload = match serde_json::to_value(value) {
            Ok(value) => Payload::Value(value),
            Err(e) => Payload::Invalid(e.to_string()),
        };
        self
    }

    /// 设置原始 JSON 值
    pub fn set_value(&mut self, value: Value) -> &mut Self {
        self.payload = Payload::Value(value);
        self
    }

    /// 过期时间
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    /// 设置绝对过期时间，`None` 表示使用池的默认生命周期
    pub fn expires_at(&mut self, expiry: Option<DateTime<Utc>>) -> &mut Self {
        self.expiry = expiry;
        self
    }

    /// 设置相对过期时间，`None` 表示使用池的默认生命周期
    pub fn expires_after(&mut self, ttl: Option<Duration>) -> &mut Self {
        // 超出可表示范围的生命周期视为永不过期
        self.expiry = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|delta| Utc::now().checked_add_signed(delta))
        });
        self
    }

    /// 剩余生命周期
    ///
    /// - `None`: 没有过期时间
    /// - `Some(Duration::ZERO)`: 已过期
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expiry.map(|expiry| {
            (expiry - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    /// 是否已过期
    pub fn is_expired(&self) -> bool {
        matches!(self.expiry, Some(expiry) if expiry <= Utc::now())
    }

    /// 附加标签
    ///
    /// 标签名遵循与缓存键相同的规则。
    pub fn tag<I, S>(&mut self, tags: I) -> Result<&mut Self, CacheError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            validate_key(&tag)?;
            self.tags.insert(tag);
        }
        Ok(self)
    }

    /// 下次保存时附加的标签
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// 后端记录上携带的标签
    pub fn previous_tags(&self) -> impl Iterator<Item = &str> {
        self.tag_versions.keys().map(String::as_str)
    }

    pub(crate) fn tag_versions(&self) -> &BTreeMap<String, u64> {
        &self.tag_versions
    }

    pub(crate) fn set_tag_versions(&mut self, tag_versions: BTreeMap<String, u64>) {
        self.tag_versions = tag_versions;
    }

    /// 转为未命中条目（保留键）
    pub(crate) fn into_miss(self) -> Self {
        Self::new(self.key)
    }

    /// 校验值是否可保存
    pub(crate) fn validate_payload(&self) -> Result<(), CacheError> {
        match &self.payload {
            Payload::Invalid(reason) => Err(CacheError::Serialization(format!(
                "条目 \"{}\" 的值无法序列化: {}",
                self.key, reason
            ))),
            _ => Ok(()),
        }
    }

    /// 待保存的值（未设置时为 `null`）
    pub(crate) fn stored_value(&self) -> Value {
        match &self.payload {
            Payload::Value(value) => value.clone(),
            _ => Value::Null,
        }
    }

    /// 保存到缓冲区后对同一池可见的命中副本
    pub(crate) fn as_buffered_hit(&self) -> Self {
        let mut item = self.clone();
        item.is_hit = true;
        item
    }
}
