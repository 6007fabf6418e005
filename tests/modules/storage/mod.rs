//! 存储模块测试
//!
//! 包含所有存储后端的单元测试和集成测试
