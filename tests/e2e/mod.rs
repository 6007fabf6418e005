//! 端到端测试模块
//!
//! 测试完整的使用流程和场景

#[cfg(feature = "filesystem")]
mod config_driven;
mod tagged_catalog;
