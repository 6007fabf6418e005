//! 基础缓存池集成测试
//!
//! 覆盖读写往返、延迟写入、版本化清空和后端故障时的降级行为

use cachepool::{
    error::CacheError,
    item::CacheItem,
    pool::{CacheItemPool, CachePool, PoolOptions},
    storage::Storage,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{
    create_memory_pool, create_memory_storage, create_versioned_pool, wait_millis,
    CountingStorage, FailingStorage,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: u64,
    name: String,
    roles: Vec<String>,
}

/// 保存后读取得到相同的值
#[tokio::test]
async fn test_round_trip_structured_value() {
    let pool = create_memory_pool("app");
    let profile = Profile {
        id: 42,
        name: "Alice".to_string(),
        roles: vec!["admin".to_string()],
    };

    let mut item = pool.get_item("profile.42").await.unwrap();
    item.set(&profile);
    assert!(pool.save(item).await.unwrap());

    let item = pool.get_item("profile.42").await.unwrap();
    assert!(item.is_hit());
    assert_eq!(item.get::<Profile>(), Some(profile));
}

/// 从未保存的键总是未命中
#[tokio::test]
async fn test_unknown_keys_miss() {
    let pool = create_memory_pool("app");
    for key in ["a", "b.c", "very-long_key+1"] {
        let item = pool.get_item(key).await.unwrap();
        assert!(!item.is_hit());
        assert_eq!(item.get::<String>(), None);
        assert!(!pool.has_item(key).await.unwrap());
    }
}

/// 非法键返回 InvalidKey，且不触达后端
#[tokio::test]
async fn test_invalid_keys_rejected() {
    let storage = Arc::new(CountingStorage::new());
    let pool = CachePool::with_namespace(storage.clone(), "app").unwrap();

    for key in ["", "a{b", "a}b", "(x)", "a/b", "a\\b", "user@host", "ns:key"] {
        assert!(
            matches!(pool.get_item(key).await, Err(CacheError::InvalidKey(_))),
            "key {:?} should be rejected",
            key
        );
    }
    assert!(matches!(
        pool.get_items(&["ok", "bad:key"]).await,
        Err(CacheError::InvalidKey(_))
    ));
    assert!(matches!(
        pool.save(CacheItem::with_value("bad/key", 1)).await,
        Err(CacheError::InvalidKey(_))
    ));
    assert!(matches!(
        pool.delete_items(&["ok", "{bad}"]).await,
        Err(CacheError::InvalidKey(_))
    ));
    assert_eq!(storage.calls(), 0);
}

/// 非法命名空间在构造时报错
#[tokio::test]
async fn test_invalid_namespace_rejected() {
    let result = CachePool::with_namespace(create_memory_storage(), "bad:ns");
    assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
}

/// 批量读取按请求顺序返回
#[tokio::test]
async fn test_get_items_preserves_order() {
    let pool = create_memory_pool("app");
    pool.save(CacheItem::with_value("b", 2)).await.unwrap();
    pool.save(CacheItem::with_value("d", 4)).await.unwrap();

    let items = pool.get_items(&["a", "b", "c", "d"]).await.unwrap();
    let keys: Vec<&str> = items.iter().map(|item| item.key()).collect();
    assert_eq!(keys, vec!["a", "b", "c", "d"]);
    let hits: Vec<bool> = items.iter().map(|item| item.is_hit()).collect();
    assert_eq!(hits, vec![false, true, false, true]);
    assert_eq!(items[3].get::<i32>(), Some(4));
}

/// 条目过期后未命中
#[tokio::test]
async fn test_item_expiry() {
    let pool = create_memory_pool("app");
    let mut item = CacheItem::with_value("short", "v");
    item.expires_after(Some(Duration::from_millis(50)));
    assert!(pool.save(item).await.unwrap());
    assert!(pool.has_item("short").await.unwrap());

    wait_millis(120).await;
    assert!(!pool.get_item("short").await.unwrap().is_hit());
}

/// 已过期的条目保存时被删除
#[tokio::test]
async fn test_saving_expired_item_deletes_it() {
    let pool = create_memory_pool("app");
    pool.save(CacheItem::with_value("k", 1)).await.unwrap();

    let mut item = CacheItem::with_value("k", 2);
    item.expires_at(Some(chrono::Utc::now() - chrono::Duration::seconds(1)));
    assert!(pool.save(item).await.unwrap());
    assert!(!pool.has_item("k").await.unwrap());
}

/// 默认生命周期作用于没有过期时间的条目
#[tokio::test]
async fn test_default_lifetime() {
    let pool = CachePool::new(
        create_memory_storage(),
        PoolOptions::new()
            .namespace("app")
            .default_lifetime(Some(Duration::from_millis(60))),
    )
    .unwrap();

    pool.save(CacheItem::with_value("k", 1)).await.unwrap();
    let item = pool.get_item("k").await.unwrap();
    assert!(item.is_hit());
    assert!(item.expiry().is_some());

    wait_millis(150).await;
    assert!(!pool.has_item("k").await.unwrap());
}

/// 延迟写入：后写覆盖，同一实例立即可见，其他实例提交后才可见
#[tokio::test]
async fn test_deferred_last_write_wins() {
    let storage = create_memory_storage();
    let pool = CachePool::with_namespace(storage.clone(), "app").unwrap();
    let other = CachePool::with_namespace(storage, "app").unwrap();

    pool.save_deferred(CacheItem::with_value("k", "A")).await.unwrap();
    pool.save_deferred(CacheItem::with_value("k", "A'")).await.unwrap();
    assert_eq!(pool.deferred_len(), 1);

    assert_eq!(
        pool.get_item("k").await.unwrap().get::<String>(),
        Some("A'".to_string())
    );
    assert!(!other.has_item("k").await.unwrap());

    assert!(pool.commit().await);
    assert_eq!(pool.deferred_len(), 0);
    assert_eq!(
        other.get_item("k").await.unwrap().get::<String>(),
        Some("A'".to_string())
    );
}

/// 立即保存会丢弃同键的延迟条目
#[tokio::test]
async fn test_save_supersedes_deferred() {
    let pool = create_memory_pool("app");
    pool.save_deferred(CacheItem::with_value("k", 1)).await.unwrap();
    pool.save(CacheItem::with_value("k", 2)).await.unwrap();
    assert!(pool.commit().await);
    assert_eq!(pool.get_item("k").await.unwrap().get::<i32>(), Some(2));
}

/// 删除同时作用于缓冲区和后端
#[tokio::test]
async fn test_delete_is_idempotent() {
    let pool = create_memory_pool("app");
    pool.save(CacheItem::with_value("a", 1)).await.unwrap();
    pool.save_deferred(CacheItem::with_value("b", 2)).await.unwrap();

    assert!(pool.delete_items(&["a", "b", "never"]).await.unwrap());
    assert!(!pool.has_item("a").await.unwrap());
    assert!(!pool.has_item("b").await.unwrap());
    assert!(pool.delete_item("a").await.unwrap());
    assert!(pool.commit().await);
    assert!(!pool.has_item("b").await.unwrap());
}

/// 无版本化时按前缀清空，只影响本命名空间
#[tokio::test]
async fn test_clear_respects_namespace() {
    let storage = create_memory_storage();
    let users = CachePool::with_namespace(storage.clone(), "users").unwrap();
    let orders = CachePool::with_namespace(storage.clone(), "orders").unwrap();

    users.save(CacheItem::with_value("1", "u")).await.unwrap();
    orders.save(CacheItem::with_value("1", "o")).await.unwrap();

    assert!(users.clear().await);
    assert!(!users.has_item("1").await.unwrap());
    assert!(orders.has_item("1").await.unwrap());
}

/// 版本化清空的后端调用次数与条目数量无关
#[tokio::test]
async fn test_versioned_clear_is_constant_cost() {
    for n in [10usize, 200] {
        let storage = Arc::new(CountingStorage::new());
        let pool = create_versioned_pool(storage.clone(), "app");

        let keys: Vec<String> = (0..n).map(|i| format!("item{}", i)).collect();
        for key in &keys {
            pool.save_deferred(CacheItem::with_value(key.as_str(), key.as_str()))
                .await
                .unwrap();
        }
        assert!(pool.commit().await);

        storage.reset();
        assert!(pool.clear().await);
        assert_eq!(storage.increments(), 1);
        assert_eq!(storage.calls(), 1, "clear of {} items", n);

        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let items = pool.get_items(&refs).await.unwrap();
        assert!(items.iter().all(|item| !item.is_hit()));
        assert_eq!(storage.multi_fetches(), 1);
        assert_eq!(storage.calls(), 2, "clear + get_items of {} items", n);
    }
}

/// 另一实例的版本化清空在新实例上生效
#[tokio::test]
async fn test_versioned_clear_visible_to_new_instances() {
    let storage: Arc<dyn Storage> = create_memory_storage();
    let writer = create_versioned_pool(storage.clone(), "app");
    writer.save(CacheItem::with_value("k", 1)).await.unwrap();

    let clearer = create_versioned_pool(storage.clone(), "app");
    assert!(clearer.clear().await);

    let reader = create_versioned_pool(storage, "app");
    assert!(!reader.has_item("k").await.unwrap());

    // 清空后写入使用新版本
    clearer.save(CacheItem::with_value("k", 2)).await.unwrap();
    assert_eq!(reader.get_item("k").await.unwrap().get::<i32>(), Some(2));
}

/// 后端不可用时读为未命中、写为 false，不返回错误
#[tokio::test]
async fn test_backend_failure_is_swallowed() {
    for versioning in [false, true] {
        let pool = CachePool::new(
            Arc::new(FailingStorage),
            PoolOptions::new().namespace("app").versioning(versioning),
        )
        .unwrap();

        assert!(!pool.get_item("k").await.unwrap().is_hit());
        assert!(!pool.has_item("k").await.unwrap());
        assert!(pool
            .get_items(&["a", "b"])
            .await
            .unwrap()
            .iter()
            .all(|item| !item.is_hit()));
        assert!(!pool.save(CacheItem::with_value("k", 1)).await.unwrap());
        assert!(!pool.delete_item("k").await.unwrap());
        assert!(!pool.clear().await);

        pool.save_deferred(CacheItem::with_value("k", 1)).await.unwrap();
        assert!(!pool.commit().await);
        assert_eq!(pool.deferred_len(), 0);
    }
}

/// 内存存储不支持清理
#[tokio::test]
async fn test_memory_pool_not_pruneable() {
    let pool = create_memory_pool("app");
    assert!(pool.as_pruneable().is_none());
}
