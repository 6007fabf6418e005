//! 链式缓存池集成测试

use cachepool::{
    chain::ChainPool,
    item::CacheItem,
    pool::{CacheItemPool, CachePool, PoolOptions},
    tag_aware::TagAwarePool,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{create_memory_pool, create_memory_storage, FailingStorage};

fn pool_with_lifetime(lifetime: Option<Duration>) -> Arc<dyn CacheItemPool> {
    Arc::new(
        CachePool::new(
            create_memory_storage(),
            PoolOptions::new().namespace("chain").default_lifetime(lifetime),
        )
        .unwrap(),
    )
}

/// 回填的过期时间不超过源层剩余生命周期
#[tokio::test]
async fn test_promotion_respects_remaining_lifetime() {
    let fast = create_memory_pool("chain");
    let slow = create_memory_pool("chain");

    let mut item = CacheItem::with_value("k", "v");
    item.expires_after(Some(Duration::from_secs(30)));
    slow.save(item).await.unwrap();
    let slow_expiry = slow.get_item("k").await.unwrap().expiry().unwrap();

    let chain = ChainPool::new(vec![fast.clone(), slow.clone()]).unwrap();
    let item = chain.get_item("k").await.unwrap();
    assert!(item.is_hit());
    assert_eq!(chain.stats().level_hits, vec![0, 1]);
    assert_eq!(chain.stats().promotions, 1);

    let promoted = fast.get_item("k").await.unwrap();
    assert!(promoted.is_hit());
    assert!(promoted.expiry().unwrap() <= slow_expiry);

    // 第二次读取命中第一层
    chain.get_item("k").await.unwrap();
    assert_eq!(chain.stats().level_hits, vec![1, 1]);
}

/// 回填按目标层和链的默认生命周期截断
#[tokio::test]
async fn test_promotion_clipped_to_default_lifetimes() {
    let fast = pool_with_lifetime(Some(Duration::from_secs(5)));
    let middle = pool_with_lifetime(None);
    let slow = pool_with_lifetime(None);
    slow.save(CacheItem::with_value("k", 1)).await.unwrap();

    let chain = ChainPool::new(vec![fast.clone(), middle.clone(), slow])
        .unwrap()
        .with_default_lifetime(Some(Duration::from_secs(60)));
    assert!(chain.get_item("k").await.unwrap().is_hit());

    let now = Utc::now();
    let fast_expiry = fast.get_item("k").await.unwrap().expiry().unwrap();
    assert!(fast_expiry <= now + chrono::Duration::seconds(5));

    let middle_expiry = middle.get_item("k").await.unwrap().expiry().unwrap();
    assert!(middle_expiry > now + chrono::Duration::seconds(5));
    assert!(middle_expiry <= now + chrono::Duration::seconds(60));
}

/// 写入扇出到所有层，单层失败不会中断其他层
#[tokio::test]
async fn test_save_fans_out_without_short_circuit() {
    let broken: Arc<dyn CacheItemPool> =
        Arc::new(CachePool::with_namespace(Arc::new(FailingStorage), "chain").unwrap());
    let healthy = create_memory_pool("chain");
    let chain = ChainPool::new(vec![broken, healthy.clone()]).unwrap();

    assert!(!chain.save(CacheItem::with_value("k", 1)).await.unwrap());
    assert!(healthy.has_item("k").await.unwrap());

    // 故障层读为未命中，继续查找下一层
    assert_eq!(chain.get_item("k").await.unwrap().get::<i32>(), Some(1));
}

/// 延迟写入在提交时到达每一层
#[tokio::test]
async fn test_deferred_commit_reaches_every_level() {
    let fast = create_memory_pool("chain");
    let slow = create_memory_pool("chain");
    let chain = ChainPool::new(vec![fast.clone(), slow.clone()]).unwrap();

    chain.save_deferred(CacheItem::with_value("k", 1)).await.unwrap();
    assert!(chain.has_item("k").await.unwrap());
    assert!(chain.commit().await);

    assert!(fast.has_item("k").await.unwrap());
    assert!(slow.has_item("k").await.unwrap());
}

/// 批量读取按层补齐并回填
#[tokio::test]
async fn test_get_items_across_levels() {
    let fast = create_memory_pool("chain");
    let slow = create_memory_pool("chain");
    fast.save(CacheItem::with_value("a", "fast")).await.unwrap();
    slow.save(CacheItem::with_value("b", "slow")).await.unwrap();

    let chain = ChainPool::new(vec![fast.clone(), slow]).unwrap();
    let items = chain.get_items(&["a", "b", "c"]).await.unwrap();
    assert_eq!(items[0].get::<String>(), Some("fast".to_string()));
    assert_eq!(items[1].get::<String>(), Some("slow".to_string()));
    assert!(!items[2].is_hit());

    let stats = chain.stats();
    assert_eq!(stats.level_hits, vec![1, 1]);
    assert_eq!(stats.misses, 1);
    assert!(fast.has_item("b").await.unwrap());

    chain.reset_stats();
    assert_eq!(chain.stats().hits(), 0);
}

/// 删除和清空作用于所有层
#[tokio::test]
async fn test_delete_and_clear_all_levels() {
    let fast = create_memory_pool("chain");
    let slow = create_memory_pool("chain");
    let chain = ChainPool::new(vec![fast.clone(), slow.clone()]).unwrap();

    chain.save(CacheItem::with_value("a", 1)).await.unwrap();
    chain.save(CacheItem::with_value("b", 2)).await.unwrap();

    assert!(chain.delete_item("a").await.unwrap());
    assert!(!fast.has_item("a").await.unwrap());
    assert!(!slow.has_item("a").await.unwrap());

    assert!(chain.clear().await);
    assert!(!chain.has_item("b").await.unwrap());
}

/// 标签感知缓存池可以作为链的一层
#[tokio::test]
async fn test_tag_aware_member() {
    let storage = create_memory_storage();
    let inner = Arc::new(CachePool::with_namespace(storage.clone(), "slow").unwrap());
    let tagged = Arc::new(TagAwarePool::new(inner, storage, "slow").unwrap());
    let fast = create_memory_pool("fast");

    let chain =
        ChainPool::new(vec![fast.clone(), tagged.clone() as Arc<dyn CacheItemPool>]).unwrap();
    let mut item = CacheItem::with_value("k", "v");
    item.tag(["t1"]).unwrap();
    tagged.save(item).await.unwrap();

    assert!(chain.get_item("k").await.unwrap().is_hit());
    assert!(fast.has_item("k").await.unwrap());

    tagged.invalidate_tags(&["t1"]).await.unwrap();
    assert!(!tagged.has_item("k").await.unwrap());
    // 已回填的层不受标签失效影响
    assert!(fast.has_item("k").await.unwrap());
}
