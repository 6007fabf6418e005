//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 缓存池工厂模块
//!
//! 根据 [`CacheConfig`] 创建存储后端、缓存池和链。
//!
//! # 特性
//!
//! - **统一创建接口** - 通过配置动态创建缓存池
//! - **特性感知** - 未启用的后端返回配置错误而不是编译失败
//! - **组合** - 标签感知包装与链按定义顺序组装

use ahash::AHashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::chain::ChainPool;
use crate::config::{CacheConfig, ChainDefinition, PoolDefinition, StorageConfig};
use crate::error::CacheError;
use crate::memory_storage::{MemoryStorage, MemoryStorageConfig};
use crate::pool::{CacheItemPool, CachePool, PoolOptions};
use crate::storage::{NullStorage, Storage};
use crate::tag_aware::TagAwarePool;

/// 按名称索引的已构建缓存池
#[derive(Default)]
pub struct PoolRegistry {
    pools: AHashMap<String, Arc<dyn CacheItemPool>>,
    tag_aware: AHashMap<String, Arc<TagAwarePool>>,
}

impl PoolRegistry {
    /// 按名称获取缓存池或链
    pub fn get(&self, name: &str) -> Option<Arc<dyn CacheItemPool>> {
        self.pools.get(name).cloned()
    }

    /// 按名称获取标签感知缓存池
    pub fn tag_aware(&self, name: &str) -> Option<Arc<TagAwarePool>> {
        self.tag_aware.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

/// 缓存池工厂
///
/// # 示例
///
/// ```rust,ignore
/// use cachepool::config::CacheConfig;
/// use cachepool::factory::PoolFactory;
///
/// let config = CacheConfig::from_file("cache.yaml")?;
/// let registry = PoolFactory::build(&config).await?;
/// let pool = registry.get("fast").unwrap();
/// ```
pub struct PoolFactory;

impl PoolFactory {
    /// 构建配置中的全部缓存池和链
    pub async fn build(config: &CacheConfig) -> Result<PoolRegistry, CacheError> {
        config.validate().map_err(CacheError::InvalidConfiguration)?;

        let mut registry = PoolRegistry::default();
        for definition in &config.pools {
            if definition.tags {
                let pool = Self::create_tag_aware(definition).await?;
                registry
                    .pools
                    .insert(definition.name.clone(), pool.clone() as Arc<dyn CacheItemPool>);
                registry.tag_aware.insert(definition.name.clone(), pool);
            } else {
                let pool = Self::create(definition).await?;
                registry.pools.insert(definition.name.clone(), pool);
            }
        }

        for definition in &config.chains {
            let chain = Self::create_chain(definition, &registry)?;
            registry.pools.insert(definition.name.clone(), chain);
        }

        info!(
            "缓存池构建完成: {} 个缓存池, {} 条链",
            config.pools.len(),
            config.chains.len()
        );
        Ok(registry)
    }

    /// 从定义创建缓存池，`tags` 为真时返回标签感知缓存池
    pub async fn create(definition: &PoolDefinition) -> Result<Arc<dyn CacheItemPool>, CacheError> {
        if definition.tags {
            return Ok(Self::create_tag_aware(definition).await?);
        }
        let storage = Self::create_storage(&definition.storage).await?;
        Ok(Arc::new(Self::create_pool(definition, storage)?))
    }

    /// 从定义创建标签感知缓存池，标签计数器与条目共用同一后端
    pub async fn create_tag_aware(
        definition: &PoolDefinition,
    ) -> Result<Arc<TagAwarePool>, CacheError> {
        let storage = Self::create_storage(&definition.storage).await?;
        let pool = Arc::new(Self::create_pool(definition, storage.clone())?);
        let tagged = TagAwarePool::new(pool, storage, &definition.namespace)?
            .with_missing_tag_policy(definition.missing_tag_policy);
        Ok(Arc::new(tagged))
    }

    fn create_pool(
        definition: &PoolDefinition,
        storage: Arc<dyn Storage>,
    ) -> Result<CachePool, CacheError> {
        let default_lifetime = definition
            .default_lifetime
            .as_deref()
            .map(Self::parse_lifetime)
            .transpose()?;

        debug!(
            "创建缓存池 {}: storage={}, namespace={}",
            definition.name,
            definition.storage.kind(),
            definition.namespace
        );

        CachePool::new(
            storage,
            PoolOptions::new()
                .namespace(definition.namespace.clone())
                .default_lifetime(default_lifetime)
                .versioning(definition.versioning),
        )
    }

    /// 从已构建的缓存池组装链
    pub fn create_chain(
        definition: &ChainDefinition,
        registry: &PoolRegistry,
    ) -> Result<Arc<dyn CacheItemPool>, CacheError> {
        let pools = definition
            .pools
            .iter()
            .map(|name| {
                registry.get(name).ok_or_else(|| {
                    CacheError::InvalidConfiguration(format!(
                        "链 {} 引用了未定义的缓存池: {}",
                        definition.name, name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let default_lifetime = definition
            .default_lifetime
            .as_deref()
            .map(Self::parse_lifetime)
            .transpose()?;

        Ok(Arc::new(
            ChainPool::new(pools)?.with_default_lifetime(default_lifetime),
        ))
    }

    /// 从配置创建存储后端
    pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, CacheError> {
        config.validate().map_err(CacheError::InvalidConfiguration)?;
        match config {
            StorageConfig::Memory { capacity } => Ok(Arc::new(MemoryStorage::with_config(
                MemoryStorageConfig::new().capacity(*capacity),
            ))),
            StorageConfig::Null => Ok(Arc::new(NullStorage)),
            StorageConfig::Filesystem { directory } => filesystem_storage(directory).await,
            StorageConfig::Redis { url, db } => redis_storage(url, *db).await,
            StorageConfig::Postgres { url, table } => postgres_storage(url, table).await,
        }
    }

    /// 解析生命周期字符串
    ///
    /// # 支持的格式
    ///
    /// - `10s` - 10秒
    /// - `5m` - 5分钟
    /// - `2h` - 2小时
    /// - `1d` - 1天
    pub fn parse_lifetime(lifetime: &str) -> Result<Duration, CacheError> {
        if lifetime.is_empty() {
            return Err(CacheError::InvalidConfiguration(
                "生命周期不能为空".to_string(),
            ));
        }

        let (num_part, unit_part) = lifetime.split_at(
            lifetime
                .find(|c: char| c.is_alphabetic())
                .unwrap_or(lifetime.len()),
        );

        let num_str = num_part.trim();
        let unit = unit_part.trim().to_lowercase();

        if num_str.is_empty() {
            return Err(CacheError::InvalidConfiguration(
                "生命周期格式错误：缺少数字部分".to_string(),
            ));
        }

        let num: u64 = num_str.parse().map_err(|_| {
            CacheError::InvalidConfiguration(format!("无效的数字格式: {}", num_str))
        })?;

        if num == 0 {
            return Err(CacheError::InvalidConfiguration(
                "生命周期必须大于0".to_string(),
            ));
        }

        let multiplier = match unit.as_str() {
            "s" | "sec" | "second" | "seconds" => 1,
            "m" | "min" | "minute" | "minutes" => 60,
            "h" | "hr" | "hour" | "hours" => 3600,
            "d" | "day" | "days" => 86400,
            _ => {
                return Err(CacheError::InvalidConfiguration(format!(
                    "不支持的单位: {}。支持的单位: s, m, h, d",
                    unit
                )));
            }
        };

        num.checked_mul(multiplier)
            .map(Duration::from_secs)
            .ok_or_else(|| CacheError::InvalidConfiguration(format!("生命周期过大: {}", lifetime)))
    }
}

#[cfg(not(all(feature = "filesystem", feature = "redis", feature = "postgres")))]
fn feature_disabled(feature: &str) -> CacheError {
    CacheError::InvalidConfiguration(format!("未启用 {} 特性", feature))
}

#[cfg(feature = "filesystem")]
async fn filesystem_storage(directory: &std::path::Path) -> Result<Arc<dyn Storage>, CacheError> {
    use crate::filesystem_storage::{FilesystemStorage, FilesystemStorageConfig};

    let storage = FilesystemStorage::new(FilesystemStorageConfig::new(directory)).await?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "filesystem"))]
async fn filesystem_storage(_directory: &std::path::Path) -> Result<Arc<dyn Storage>, CacheError> {
    Err(feature_disabled("filesystem"))
}

#[cfg(feature = "redis")]
async fn redis_storage(url: &str, db: i64) -> Result<Arc<dyn Storage>, CacheError> {
    use crate::redis_storage::{RedisConfig, RedisStorage};

    let storage = RedisStorage::new(RedisConfig::new(url).db(db)).await?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "redis"))]
async fn redis_storage(_url: &str, _db: i64) -> Result<Arc<dyn Storage>, CacheError> {
    Err(feature_disabled("redis"))
}

#[cfg(feature = "postgres")]
async fn postgres_storage(url: &str, table: &str) -> Result<Arc<dyn Storage>, CacheError> {
    use crate::postgres_storage::{PostgresStorage, PostgresStorageConfig};

    let storage = PostgresStorage::new(PostgresStorageConfig::new(url).table(table)).await?;
    storage.create_table().await?;
    Ok(Arc::new(storage))
}

#[cfg(not(feature = "postgres"))]
async fn postgres_storage(_url: &str, _table: &str) -> Result<Arc<dyn Storage>, CacheError> {
    Err(feature_disabled("postgres"))
}

// ============================================================================
// 单元测试
// ============================================================================
