//! 代理缓存池测试
