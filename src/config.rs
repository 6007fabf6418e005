//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 配置模块
//!
//! 定义缓存池的配置结构，支持 YAML 和 TOML。

use ahash::AHashSet as HashSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_MEMORY_CAPACITY, DEFAULT_POSTGRES_TABLE};
use crate::error::CacheError;
use crate::factory::PoolFactory;
use crate::tag_aware::MissingTagPolicy;

/// 缓存配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub pools: Vec<PoolDefinition>,
    #[serde(default)]
    pub chains: Vec<ChainDefinition>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            pools: Vec::new(),
            chains: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// 从 YAML 字符串解析
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CacheError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(toml: &str) -> Result<Self, CacheError> {
        Ok(toml::from_str(toml)?)
    }

    /// 从文件加载，按扩展名选择格式
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content)?,
            Some("toml") => Self::from_toml_str(&content)?,
            _ => {
                return Err(CacheError::InvalidConfiguration(format!(
                    "不支持的配置文件格式: {}",
                    path.display()
                )))
            }
        };
        config.validate().map_err(CacheError::InvalidConfiguration)?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.version.is_empty() {
            return Err("版本号不能为空".to_string());
        }

        if self.pools.is_empty() {
            return Err("至少需要一个缓存池".to_string());
        }

        let mut names = HashSet::new();
        for (index, pool) in self.pools.iter().enumerate() {
            if !names.insert(pool.name.as_str()) {
                return Err(format!("缓存池名称重复: {}", pool.name));
            }
            pool.validate()
                .map_err(|e| format!("缓存池[{}]校验失败: {}", index, e))?;
        }

        // 链只能引用缓存池或在它之前定义的链
        for (index, chain) in self.chains.iter().enumerate() {
            chain
                .validate()
                .map_err(|e| format!("链[{}]校验失败: {}", index, e))?;
            for member in &chain.pools {
                if !names.contains(member.as_str()) {
                    return Err(format!("链 {} 引用了未定义的缓存池: {}", chain.name, member));
                }
            }
            if !names.insert(chain.name.as_str()) {
                return Err(format!("链名称重复: {}", chain.name));
            }
        }

        Ok(())
    }

    /// 按名称查找缓存池定义
    pub fn pool(&self, name: &str) -> Option<&PoolDefinition> {
        self.pools.iter().find(|pool| pool.name == name)
    }

    /// 按名称查找链定义
    pub fn chain(&self, name: &str) -> Option<&ChainDefinition> {
        self.chains.iter().find(|chain| chain.name == name)
    }
}

/// 缓存池定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDefinition {
    pub name: String,
    /// 为空时使用默认命名空间
    #[serde(default)]
    pub namespace: String,
    /// 如 "30s"、"5m"、"2h"、"1d"；为空表示永不过期
    #[serde(default)]
    pub default_lifetime: Option<String>,
    #[serde(default)]
    pub versioning: bool,
    /// 是否包装为标签感知缓存池
    #[serde(default)]
    pub tags: bool,
    #[serde(default)]
    pub missing_tag_policy: MissingTagPolicy,
    pub storage: StorageConfig,
}

impl PoolDefinition {
    pub fn new(name: impl Into<String>, storage: StorageConfig) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            default_lifetime: None,
            versioning: false,
            tags: false,
            missing_tag_policy: MissingTagPolicy::default(),
            storage,
        }
    }

    /// 校验缓存池定义
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("缓存池名称不能为空".to_string());
        }
        crate::key_codec::normalize_namespace(&self.namespace).map_err(|e| e.to_string())?;
        validate_lifetime(self.default_lifetime.as_deref())?;
        self.storage.validate()
    }
}

/// 存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory {
        #[serde(default = "default_capacity")]
        capacity: usize,
    },
    Filesystem {
        directory: PathBuf,
    },
    Null,
    Redis {
        url: String,
        #[serde(default)]
        db: i64,
    },
    Postgres {
        url: String,
        #[serde(default = "default_table")]
        table: String,
    },
}

fn default_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

fn default_table() -> String {
    DEFAULT_POSTGRES_TABLE.to_string()
}

impl StorageConfig {
    /// 存储类型名称
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::Memory { .. } => "memory",
            StorageConfig::Filesystem { .. } => "filesystem",
            StorageConfig::Null => "null",
            StorageConfig::Redis { .. } => "redis",
            StorageConfig::Postgres { .. } => "postgres",
        }
    }

    /// 校验存储配置
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Memory { capacity } => {
                if *capacity == 0 {
                    return Err("内存容量不能为0".to_string());
                }
            }
            StorageConfig::Filesystem { directory } => {
                if directory.as_os_str().is_empty() {
                    return Err("缓存目录不能为空".to_string());
                }
            }
            StorageConfig::Null => {}
            StorageConfig::Redis { url, db } => {
                if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                    return Err(format!("无效的Redis地址: {}", url));
                }
                if *db < 0 {
                    return Err("Redis数据库编号不能为负数".to_string());
                }
            }
            StorageConfig::Postgres { url, table } => {
                if url.is_empty() {
                    return Err("数据库地址不能为空".to_string());
                }
                let valid = table
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                    && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if !valid {
                    return Err(format!("无效的表名: {}", table));
                }
            }
        }
        Ok(())
    }
}

/// 链定义，按从快到慢的顺序列出缓存池
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDefinition {
    pub name: String,
    pub pools: Vec<String>,
    /// 回填时的生命周期上限
    #[serde(default)]
    pub default_lifetime: Option<String>,
}

impl ChainDefinition {
    /// 校验链定义
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("链名称不能为空".to_string());
        }
        if self.pools.is_empty() {
            return Err("链至少需要一个缓存池".to_string());
        }
        validate_lifetime(self.default_lifetime.as_deref())
    }
}

fn validate_lifetime(lifetime: Option<&str>) -> Result<(), String> {
    match lifetime {
        Some(lifetime) => PoolFactory::parse_lifetime(lifetime)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        None => Ok(()),
    }
}
