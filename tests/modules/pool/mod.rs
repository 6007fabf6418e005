//! 基础缓存池测试

mod integration;
