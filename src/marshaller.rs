//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 记录编解码
//!
//! 缓存池写入后端的不是裸值，而是 [`StoredRecord`]：值、过期时间和标签版本快照。
//! [`Marshaller`] 负责记录与字节之间的转换，默认实现为 JSON。

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::CacheError;

/// 写入后端的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// 缓存值
    pub value: Value,
    /// 过期时间（Unix 毫秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    /// 标签版本快照
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, u64>,
}

impl StoredRecord {
    pub fn new(value: Value, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            value,
            expiry: expiry.map(|e| e.timestamp_millis()),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, u64>) -> Self {
        self.tags = tags;
        self
    }

    /// 过期时间
    pub fn expiry_time(&self) -> Option<DateTime<Utc>> {
        self.expiry
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }

    /// 是否已过期
    pub fn is_expired(&self) -> bool {
        match self.expiry {
            Some(millis) => millis <= Utc::now().timestamp_millis(),
            None => false,
        }
    }
}

/// 记录编解码器
pub trait Marshaller: Send + Sync {
    /// 编码记录
    fn marshall(&self, record: &StoredRecord) -> Result<Vec<u8>, CacheError>;

    /// 解码记录
    fn unmarshall(&self, bytes: &[u8]) -> Result<StoredRecord, CacheError>;
}

/// JSON 编解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn marshall(&self, record: &StoredRecord) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(record).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn unmarshall(&self, bytes: &[u8]) -> Result<StoredRecord, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}
