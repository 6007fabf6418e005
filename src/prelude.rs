//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Prelude module - Commonly used types for quick imports
//!
//! This module re-exports the most commonly used types from Cachepool,
//! allowing users to import them with a single `use cachepool::prelude::*;`
//! statement instead of importing each type individually.

// Core types - always available
pub use crate::error::{CacheError, StorageError};
pub use crate::item::CacheItem;
pub use crate::pool::{CacheItemPool, CachePool, PoolOptions, Pruneable};

// Adapters
pub use crate::chain::ChainPool;
pub use crate::guard::CommitGuard;
pub use crate::proxy::{ForeignItem, ForeignPool, NativePool, ProxyPool};
pub use crate::tag_aware::{MissingTagPolicy, TagAwarePool};

// Always-available storage
pub use crate::memory_storage::MemoryStorage;
pub use crate::storage::{NullStorage, PruneableStorage, Storage};

// Configuration
pub use crate::config::CacheConfig;
pub use crate::factory::PoolFactory;

// Feature-gated exports
#[cfg(feature = "filesystem")]
pub use crate::filesystem_storage::FilesystemStorage;

#[cfg(feature = "postgres")]
pub use crate::postgres_storage::PostgresStorage;

#[cfg(feature = "redis")]
pub use crate::redis_storage::RedisStorage;
