//! 带标签的缓存池示例

use cachepool::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // 条目和标签计数器共用一个内存后端
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let inner = Arc::new(
        CachePool::new(
            storage.clone(),
            PoolOptions::new()
                .namespace("demo")
                .default_lifetime(Some(Duration::from_secs(300)))
                .versioning(true),
        )
        .expect("命名空间合法"),
    );
    let pool = TagAwarePool::new(inner, storage, "demo").expect("命名空间合法");

    for (key, name, tag) in [("user.1", "alice", "admins"), ("user.2", "bob", "guests")] {
        let mut item = CacheItem::with_value(key, name);
        item.tag([tag]).expect("标签合法");
        pool.save(item).await.expect("键合法");
    }

    match pool.invalidate_tags(&["admins"]).await {
        Ok(true) => println!("标签 admins 已失效"),
        Ok(false) => println!("标签失效未完全成功"),
        Err(e) => eprintln!("错误: {}", e),
    }

    for key in ["user.1", "user.2"] {
        let item = pool.get_item(key).await.expect("键合法");
        match item.get::<String>() {
            Some(name) => println!("{} 命中: {}", key, name),
            None => println!("{} 未命中", key),
        }
    }
}
