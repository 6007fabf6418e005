//! 集成测试模块
//!
//! 需要外部服务的后端测试，默认忽略

#[cfg(feature = "postgres")]
mod postgres_test;
#[cfg(feature = "redis")]
mod redis_test;
