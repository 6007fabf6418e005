//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Cachepool - Backend-agnostic Cache Pool Engine
//!
//! Provides keyed cache pools over pluggable storage backends, with deferred
//! writes, versioned namespace clearing, tag invalidation, multi-tier chains,
//! proxying of foreign pools and pruning of expired entries.
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use cachepool::prelude::*;` to import all commonly used types.
//!
//! ## Core API
//!
//! - [`CacheItem`] - A key, a value, an expiry and tags
//! - [`CacheItemPool`] - The pool contract shared by every adapter
//! - [`CachePool`] - The base pool over a [`Storage`] backend
//! - [`TagAwarePool`] - Tag invalidation on top of any pool
//! - [`ChainPool`] - Ordered multi-tier pools with promotion
//! - [`ProxyPool`] - Wraps a minimal [`ForeignPool`]
//! - [`CacheError`] - Error types
//!
//! ## Storage backends (feature-gated)
//!
//! - Memory and null storage (always available)
//! - Filesystem storage (requires `filesystem` feature, on by default)
//! - Redis storage (requires `redis` feature)
//! - PostgreSQL storage (requires `postgres` feature)
//!
//! # Examples
//!
//! ```rust
//! use cachepool::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     // 创建一个基于内存存储的缓存池
//!     let pool = CachePool::new(Arc::new(MemoryStorage::new()), PoolOptions::new()).unwrap();
//!
//!     let mut item = pool.get_item("user.42").await.unwrap();
//!     assert!(!item.is_hit());
//!
//!     item.set("Alice");
//!     assert!(pool.save(item).await.unwrap());
//!     assert!(pool.has_item("user.42").await.unwrap());
//! }
//! ```

pub mod prelude;

pub mod chain;
pub mod config;
pub mod constants;
pub mod error;
pub mod factory;
#[cfg(feature = "filesystem")]
pub mod filesystem_storage;
pub mod guard;
pub mod item;
pub mod key_codec;
pub mod marshaller;
pub mod memory_storage;
pub mod namespace;
pub mod pool;
#[cfg(feature = "postgres")]
pub mod postgres_storage;
pub mod proxy;
#[cfg(feature = "redis")]
pub mod redis_storage;
pub mod storage;
pub mod tag_aware;

// 重新导出常用类型
pub use chain::{ChainPool, ChainStats};
pub use config::{CacheConfig, ChainDefinition, PoolDefinition, StorageConfig};
pub use error::{CacheError, StorageError};
pub use factory::{PoolFactory, PoolRegistry};
#[cfg(feature = "filesystem")]
pub use filesystem_storage::{FilesystemStorage, FilesystemStorageConfig};
pub use guard::CommitGuard;
pub use item::CacheItem;
pub use key_codec::{validate_key, KeyCodec};
pub use marshaller::{JsonMarshaller, Marshaller, StoredRecord};
pub use memory_storage::{MemoryStats, MemoryStorage, MemoryStorageConfig};
pub use namespace::{NamespaceVersion, VersionState};
pub use pool::{CacheItemPool, CachePool, PoolOptions, Pruneable};
#[cfg(feature = "postgres")]
pub use postgres_storage::{PostgresStorage, PostgresStorageConfig};
pub use proxy::{ForeignItem, ForeignPool, NativePool, ProxyPool};
#[cfg(feature = "redis")]
pub use redis_storage::{RedisConfig, RedisStorage, RetryStats};
pub use storage::{NullStorage, PruneableStorage, Storage};
pub use tag_aware::{MissingTagPolicy, TagAwarePool};
