//! 服务层
//!
//! 实现积分业务逻辑，协调仓储层与时钟。
//!
//! ## 模块结构
//!
//! - `api`: 对外类型化接口
//! - `context`: 服务共享上下文
//! - `dto`: 数据传输对象定义
//! - `ledger_service`: 积分账本
//! - `rules_evaluator`: 行为规则评估
//! - `redemption_service`: 奖励目录与兑换
//! - `membership_service`: 会员生命周期
//! - `program_service`: 计划、规则与客户
//! - `stats_service`: 运营统计

pub mod api;
pub mod context;
pub mod dto;
pub mod ledger_service;
pub mod membership_service;
pub mod program_service;
pub mod redemption_service;
pub mod rules_evaluator;
pub mod stats_service;

pub use api::LoyaltyApi;
pub use context::ServiceContext;
pub use dto::*;
pub use ledger_service::LedgerService;
pub use membership_service::MembershipService;
pub use program_service::ProgramService;
pub use redemption_service::RedemptionService;
pub use rules_evaluator::{PlannedAward, RulesEvaluator};
pub use stats_service::StatsService;
