//! Redis集成测试
//!
//! 测试Redis存储的集成功能

use cachepool::item::CacheItem;
use cachepool::pool::{CacheItemPool, CachePool, PoolOptions};
use cachepool::redis_storage::{RedisConfig, RedisStorage};
use cachepool::storage::Storage;
use cachepool::tag_aware::TagAwarePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const REDIS_URL: &str = "redis://localhost:6379";

async fn connect() -> Arc<RedisStorage> {
    Arc::new(RedisStorage::new(RedisConfig::new(REDIS_URL).db(15)).await.unwrap())
}

/// 测试Redis连接
#[tokio::test]
#[ignore] // 需要Redis服务器运行
async fn test_redis_connection() {
    let storage = connect().await;
    assert!(storage.ping().await.is_ok());
}

/// 测试Redis基本读写、TTL和计数器
#[tokio::test]
#[ignore]
async fn test_redis_storage_operations() {
    let storage = connect().await;
    storage.clear("it-redis:").await.unwrap();

    storage.save("it-redis:a", b"alpha", None).await.unwrap();
    assert_eq!(
        storage.fetch("it-redis:a").await.unwrap(),
        Some(b"alpha".to_vec())
    );

    let found = storage
        .fetch_multiple(&["it-redis:a".to_string(), "it-redis:x".to_string()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    storage
        .save("it-redis:ttl", b"short", Some(Duration::from_millis(100)))
        .await
        .unwrap();
    sleep(Duration::from_millis(250)).await;
    assert!(!storage.has("it-redis:ttl").await.unwrap());

    assert_eq!(storage.increment("it-redis:n", 0).await.unwrap(), 0);
    assert_eq!(storage.increment("it-redis:n", 3).await.unwrap(), 3);
    assert_eq!(
        storage.increment_seeded("it-redis:n", 1, 1000).await.unwrap(),
        4
    );
    assert_eq!(
        storage.increment_seeded("it-redis:seeded", 1, 1000).await.unwrap(),
        1001
    );

    storage.clear("it-redis:").await.unwrap();
    assert!(!storage.has("it-redis:a").await.unwrap());
    assert!(!storage.has("it-redis:n").await.unwrap());
}

/// 测试基于Redis的版本化标签缓存池
#[tokio::test]
#[ignore]
async fn test_redis_tagged_versioned_pool() {
    let storage = connect().await;
    storage.clear("it-pool").await.unwrap();

    let inner = Arc::new(
        CachePool::new(
            storage.clone(),
            PoolOptions::new().namespace("it-pool").versioning(true),
        )
        .unwrap(),
    );
    let pool = TagAwarePool::new(inner, storage.clone(), "it-pool").unwrap();

    let mut item = CacheItem::with_value("k", "v");
    item.tag(["t1"]).unwrap();
    assert!(pool.save(item).await.unwrap());
    assert!(pool.has_item("k").await.unwrap());

    assert!(pool.invalidate_tags(&["t1"]).await.unwrap());
    assert!(!pool.has_item("k").await.unwrap());

    pool.save(CacheItem::with_value("k", "v2")).await.unwrap();
    assert!(pool.clear().await);
    assert!(!pool.has_item("k").await.unwrap());
}
