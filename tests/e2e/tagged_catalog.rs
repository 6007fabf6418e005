//! 端到端测试：带标签的商品目录
//!
//! 测试场景：
//! - 批量延迟写入商品，经提交守卫提交
//! - 按分类标签失效
//! - 版本化清空整个目录，后端调用次数与商品数量无关
//! - 通过代理以独立命名空间暴露给另一个组件

use cachepool::{
    guard::CommitGuard,
    item::CacheItem,
    pool::{CacheItemPool, CachePool, PoolOptions},
    proxy::{NativePool, ProxyPool},
    tag_aware::TagAwarePool,
};
use std::sync::Arc;

use crate::common::CountingStorage;

const PRODUCTS: usize = 50;

fn product_key(id: usize) -> String {
    format!("product.{}", id)
}

fn category(id: usize) -> &'static str {
    if id % 2 == 0 {
        "even"
    } else {
        "odd"
    }
}

fn setup() -> (Arc<CountingStorage>, Arc<TagAwarePool>) {
    let storage = Arc::new(CountingStorage::new());
    let inner = Arc::new(
        CachePool::new(
            storage.clone(),
            PoolOptions::new().namespace("catalog").versioning(true),
        )
        .unwrap(),
    );
    let pool = TagAwarePool::new(inner, storage.clone(), "catalog-tags").unwrap();
    (storage, Arc::new(pool))
}

async fn load_products(pool: &Arc<TagAwarePool>) {
    let guard = CommitGuard::new(pool.clone());
    for id in 0..PRODUCTS {
        let mut item = CacheItem::with_value(product_key(id), format!("product #{}", id));
        item.tag([category(id)]).unwrap();
        assert!(guard.save_deferred(item).await.unwrap());
    }
    assert!(guard.commit().await);
}

async fn hits(pool: &dyn CacheItemPool) -> Vec<bool> {
    let keys: Vec<String> = (0..PRODUCTS).map(product_key).collect();
    let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    pool.get_items(&refs)
        .await
        .unwrap()
        .iter()
        .map(CacheItem::is_hit)
        .collect()
}

#[tokio::test]
async fn test_category_invalidation() {
    let (_, pool) = setup();
    load_products(&pool).await;
    assert!(hits(pool.as_ref()).await.iter().all(|hit| *hit));

    assert!(pool.invalidate_tags(&["even"]).await.unwrap());
    let after = hits(pool.as_ref()).await;
    for (id, hit) in after.iter().enumerate() {
        assert_eq!(*hit, id % 2 == 1, "product {}", id);
    }

    // 重新加载后全部命中
    load_products(&pool).await;
    assert!(hits(pool.as_ref()).await.iter().all(|hit| *hit));
}

#[tokio::test]
async fn test_clear_catalog_in_constant_calls() {
    let (storage, pool) = setup();
    load_products(&pool).await;

    storage.reset();
    assert!(pool.clear().await);
    assert_eq!(storage.calls(), 1);

    storage.reset();
    assert!(hits(pool.as_ref()).await.iter().all(|hit| !*hit));
    // 条目全部未命中，不需要查询标签版本
    assert_eq!(storage.calls(), 1);
}

#[tokio::test]
async fn test_proxy_exposes_catalog_to_another_component() {
    let (_, pool) = setup();
    load_products(&pool).await;

    let storefront = ProxyPool::new(NativePool::new(pool.clone()))
        .with_namespace("storefront")
        .unwrap();
    storefront
        .save(CacheItem::with_value("banner", "sale"))
        .await
        .unwrap();

    assert!(pool.has_item("storefront.banner").await.unwrap());
    assert!(!storefront.has_item("product.1").await.unwrap());
    assert_eq!(
        storefront.get_item("banner").await.unwrap().get::<String>(),
        Some("sale".to_string())
    );
}
