//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 提交守卫
//!
//! 缓存池被丢弃时不会刷新延迟写入。需要"离开作用域自动提交"时使用 [`CommitGuard`]：
//! 优先显式调用 [`CommitGuard::commit`]；守卫被丢弃且未提交时，若处于 tokio 运行时中
//! 则派生任务提交，否则记录警告。

use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::pool::CacheItemPool;

/// 作用域内的延迟写入守卫
pub struct CommitGuard<P: CacheItemPool + ?Sized + 'static> {
    pool: Arc<P>,
    armed: bool,
}

impl<P: CacheItemPool + ?Sized + 'static> CommitGuard<P> {
    pub fn new(pool: Arc<P>) -> Self {
        Self { pool, armed: true }
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    /// 提交并解除守卫
    pub async fn commit(mut self) -> bool {
        self.armed = false;
        self.pool.commit().await
    }

    /// 解除守卫，不提交
    pub fn dismiss(mut self) {
        self.armed = false;
    }
}

impl<P: CacheItemPool + ?Sized + 'static> Deref for CommitGuard<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.pool
    }
}

impl<P: CacheItemPool + ?Sized + 'static> Drop for CommitGuard<P> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(&self.pool);
                handle.spawn(async move {
                    if !pool.commit().await {
                        warn!("提交守卫在丢弃时提交失败");
                    }
                });
                debug!("提交守卫在丢弃时派生了提交任务");
            }
            Err(_) => warn!("提交守卫在运行时之外被丢弃，延迟条目未提交"),
        }
    }
}
