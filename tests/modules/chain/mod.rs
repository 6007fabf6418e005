//! 链式缓存池测试

mod integration;
