//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 键编码器
//!
//! 将 (命名空间, 版本, 用户键) 确定性地映射为长度受限的后端ID。
//!
//! # ID 格式
//!
//! - 无版本: `{namespace}:{key}`
//! - 有版本: `{namespace}:{version}:{key}`
//! - 标签计数器: `{namespace}:tags:{tag}`
//! - 命名空间版本: `{namespace}::version`
//!
//! 超过后端声明的最大长度时，ID 折叠为 `{prefix}:{hash}`，
//! 其中 `hash` 为 SHA-256 前 16 字节的 base64url 编码（22 字符）。
//! 合法的用户键不含 `:`，因此折叠后的 ID 不会与未折叠的 ID 冲突。
//! 前缀必须在折叠后完整保留，否则按前缀清空会漏掉这些 ID，
//! 因此前缀放不下的命名空间在构造时即被拒绝。

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::constants::{
    DEFAULT_NAMESPACE, HASH_DIGEST_BYTES, ID_SEPARATOR, MAX_KEY_LENGTH, MIN_ID_LENGTH,
    RESERVED_CHARACTERS, TAG_SEGMENT, VERSION_META_SUFFIX, VERSION_SEGMENT_LENGTH,
};
use crate::error::CacheError;

/// 校验缓存键
///
/// # 返回
/// - `Ok(())`: 校验通过
/// - `Err(CacheError::InvalidKey)`: 空键、包含保留字符或超过绝对长度上限
pub fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("缓存键不能为空".to_string()));
    }

    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey(format!(
            "缓存键长度 {} 超过上限 {}",
            key.len(),
            MAX_KEY_LENGTH
        )));
    }

    if let Some(c) = key.chars().find(|c| RESERVED_CHARACTERS.contains(*c)) {
        return Err(CacheError::InvalidKey(format!(
            "缓存键 \"{}\" 包含保留字符 \"{}\"（保留字符: {}）",
            key, c, RESERVED_CHARACTERS
        )));
    }

    Ok(())
}

/// 校验并规范化命名空间
///
/// 空命名空间规范化为 [`DEFAULT_NAMESPACE`]，只允许 `[-+._A-Za-z0-9]`。
pub fn normalize_namespace(namespace: &str) -> Result<String, CacheError> {
    if namespace.is_empty() {
        return Ok(DEFAULT_NAMESPACE.to_string());
    }

    if let Some(c) = namespace
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.' | '_')))
    {
        return Err(CacheError::InvalidConfiguration(format!(
            "命名空间包含 \"{}\"，只允许 [-+._A-Za-z0-9]",
            c
        )));
    }

    Ok(namespace.to_string())
}

/// 键编码器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    namespace: String,
    max_id_length: Option<usize>,
}

impl KeyCodec {
    /// 创建键编码器
    ///
    /// # 参数
    /// - `namespace`: 命名空间（空字符串使用默认命名空间）
    /// - `max_id_length`: 后端声明的最大ID长度，`None` 表示无限制
    pub fn new(namespace: &str, max_id_length: Option<usize>) -> Result<Self, CacheError> {
        let namespace = normalize_namespace(namespace)?;

        if let Some(max) = max_id_length {
            if max < MIN_ID_LENGTH {
                return Err(CacheError::InvalidConfiguration(format!(
                    "后端最大ID长度 {} 小于下限 {}",
                    max, MIN_ID_LENGTH
                )));
            }
        }

        let codec = Self {
            namespace,
            max_id_length,
        };
        codec.reserve(0)?;
        Ok(codec)
    }

    /// 为版本段预留空间
    ///
    /// 命名空间前缀加最长版本段放不下时返回 `InvalidConfiguration`。
    pub fn versioned(self) -> Result<Self, CacheError> {
        self.reserve(VERSION_SEGMENT_LENGTH)?;
        Ok(self)
    }

    /// 为标签段预留空间
    pub fn for_tags(self) -> Result<Self, CacheError> {
        self.reserve(TAG_SEGMENT.len() + 1)?;
        Ok(self)
    }

    /// 前缀加 `segment` 必须在折叠时完整保留
    fn reserve(&self, segment: usize) -> Result<(), CacheError> {
        let Some(max) = self.max_id_length else {
            return Ok(());
        };
        let needed = self.namespace.len() + 1 + segment;
        let room = max - MIN_ID_LENGTH;
        if needed > room {
            return Err(CacheError::InvalidConfiguration(format!(
                "命名空间 \"{}\" 过长：前缀需要 {} 字符，后端最大ID长度 {} 只留出 {}",
                self.namespace, needed, max, room
            )));
        }
        Ok(())
    }

    /// 规范化后的命名空间
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 最大ID长度
    pub fn max_id_length(&self) -> Option<usize> {
        self.max_id_length
    }

    /// 命名空间前缀，用于按前缀清空
    pub fn prefix(&self) -> String {
        format!("{}{}", self.namespace, ID_SEPARATOR)
    }

    /// 计算条目ID
    pub fn id(&self, key: &str, version: Option<u64>) -> Result<String, CacheError> {
        validate_key(key)?;
        let prefix = match version {
            Some(version) => format!("{}{}{}", self.prefix(), version, ID_SEPARATOR),
            None => self.prefix(),
        };
        Ok(self.bound(prefix, key))
    }

    /// 计算标签版本计数器ID
    pub fn tag_id(&self, tag: &str) -> Result<String, CacheError> {
        validate_key(tag)?;
        let prefix = format!("{}{}{}", self.prefix(), TAG_SEGMENT, ID_SEPARATOR);
        Ok(self.bound(prefix, tag))
    }

    /// 命名空间版本的元数据ID
    pub fn version_meta_id(&self) -> String {
        let naive = format!("{}{}", self.namespace, VERSION_META_SUFFIX);
        match self.max_id_length {
            Some(max) if naive.len() > max => self.bound(self.prefix(), VERSION_META_SUFFIX),
            _ => naive,
        }
    }

    /// 将 `prefix + tail` 限制在最大长度内
    fn bound(&self, prefix: String, tail: &str) -> String {
        let max = match self.max_id_length {
            Some(max) if prefix.len() + tail.len() > max => max,
            _ => return prefix + tail,
        };

        let mut hasher = Sha256::new();
        hasher.update(prefix.as_bytes());
        hasher.update(tail.as_bytes());
        let digest = hasher.finalize();
        let hash = URL_SAFE_NO_PAD.encode(&digest[..HASH_DIGEST_BYTES]);

        let keep = max - hash.len() - 1;
        let head = if prefix.len() <= keep {
            prefix
        } else {
            // 命名空间只含 ASCII，按字节截断是安全的
            trace!("前缀过长，截断至 {} 字符", keep);
            prefix[..keep].to_string()
        };

        format!("{}{}{}", head, ID_SEPARATOR, hash)
    }
}
