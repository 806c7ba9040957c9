//! 共享库
//!
//! 包含受众规则引擎及其调用方共用的配置加载和日志初始化代码。

pub mod config;
pub mod observability;
