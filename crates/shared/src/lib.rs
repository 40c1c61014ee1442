//! 共享库
//!
//! 记录校验平台各组件共用的配置、错误处理、数据库连接与可观测性基础设施。

pub mod config;
pub mod database;
pub mod error;
pub mod observability;
