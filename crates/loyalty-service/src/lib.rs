//! 积分与会员服务
//!
//! 多租户的积分账本与会员生命周期引擎。
//!
//! ## 核心功能
//!
//! - **积分账本**：只追加的流水，余额与等级由流水重放得出
//! - **规则评估**：按行为类型发放积分，支持周期上限与会员倍率
//! - **奖励兑换**：扣积分、占库存、生成兑换码原子完成
//! - **会员管理**：pending/active/expired/cancelled 状态机与自动续期
//! - **消息幂等日志**：生命周期消息的发送记录
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 仓储层（Postgres 与内存实现）
//! - `service`: 业务服务层与对外接口
//! - `tier`: 等级划分

pub mod error;
pub mod models;
pub mod repository;
pub mod service;
pub mod tier;

pub use error::{ErrorKind, LoyaltyError, Result};
pub use models::*;
pub use repository::{MemoryStore, Repositories};
pub use service::{
    ApiResponse, LedgerService, LoyaltyApi, MembershipService, ProgramService,
    RedemptionService, RulesEvaluator, ServiceContext, StatsService, dto,
};
pub use tier::TierClassifier;
