//! 标签失效测试
