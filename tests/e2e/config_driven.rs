//! 端到端测试：由配置文件构建缓存池
//!
//! 测试场景：
//! - YAML 配置描述内存池、带标签的文件系统池和两者组成的链
//! - 工厂构建后通过名称取用
//! - 标签失效和链回填协同工作

use cachepool::{
    config::CacheConfig,
    factory::PoolFactory,
    item::CacheItem,
    pool::CacheItemPool,
};

use crate::common::init_tracing;

fn config_yaml(directory: &std::path::Path) -> String {
    format!(
        r#"
version: "1.0"
pools:
  - name: "hot"
    namespace: "catalog"
    default_lifetime: "5m"
    storage:
      type: memory
      capacity: 100
  - name: "durable"
    namespace: "catalog"
    versioning: true
    tags: true
    storage:
      type: filesystem
      directory: "{}"
chains:
  - name: "catalog"
    pools: ["hot", "durable"]
    default_lifetime: "1h"
"#,
        directory.display()
    )
}

#[tokio::test]
async fn test_build_from_yaml_file() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("cache.yaml");
    std::fs::write(&config_path, config_yaml(&dir.path().join("data"))).unwrap();

    let config = CacheConfig::from_file(&config_path).unwrap();
    let registry = PoolFactory::build(&config).await.unwrap();
    assert_eq!(registry.len(), 3);

    let catalog = registry.get("catalog").unwrap();
    let durable = registry.tag_aware("durable").unwrap();
    let hot = registry.get("hot").unwrap();

    // 带标签写入持久层，通过链读取并回填到热层
    let mut item = CacheItem::with_value("product.1", "keyboard");
    item.tag(["products"]).unwrap();
    assert!(durable.save(item).await.unwrap());

    let item = catalog.get_item("product.1").await.unwrap();
    assert_eq!(item.get::<String>(), Some("keyboard".to_string()));
    assert!(hot.has_item("product.1").await.unwrap());

    // 标签失效只作用于持久层
    assert!(durable.invalidate_tags(&["products"]).await.unwrap());
    assert!(!durable.has_item("product.1").await.unwrap());

    // 清空链后所有层都未命中
    assert!(catalog.clear().await);
    assert!(!catalog.has_item("product.1").await.unwrap());
    assert!(catalog.as_pruneable().unwrap().prune().await);
}

#[tokio::test]
async fn test_invalid_config_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("cache.toml");
    std::fs::write(
        &config_path,
        r#"
[[pools]]
name = "hot"

[pools.storage]
type = "memory"
capacity = 0
"#,
    )
    .unwrap();

    assert!(CacheConfig::from_file(&config_path).is_err());
}
