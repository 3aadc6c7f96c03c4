//! 共享库
//!
//! 包含积分账本服务与生命周期调度 Worker 共用的配置、错误处理、数据库连接、时钟和可观测性代码。

pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod test_utils;
