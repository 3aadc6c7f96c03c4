//! 数据库仓储层
//!
//! 提供所有实体的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，业务规则在 models 与 service 层
//! - 需要原子完成的单元（记账、兑换、幂等写日志）各自封装为一个仓储方法
//! - 定义 trait 接口以支持 mock 测试与内存实现

mod customer_repo;
mod ledger_repo;
mod ledger_unit;
mod membership_repo;
mod memory;
mod notification_log_repo;
mod program_repo;
mod reward_repo;
mod traits;

use std::sync::Arc;

use sqlx::PgPool;

pub use customer_repo::CustomerRepository;
pub use ledger_repo::LedgerRepository;
pub use membership_repo::MembershipRepository;
pub use memory::MemoryStore;
pub use notification_log_repo::NotificationLogRepository;
pub use program_repo::ProgramRepository;
pub use reward_repo::RewardRepository;
pub use traits::*;

/// 服务层使用的全部仓储
#[derive(Clone)]
pub struct Repositories {
    pub programs: Arc<dyn ProgramRepositoryTrait>,
    pub customers: Arc<dyn CustomerRepositoryTrait>,
    pub ledger: Arc<dyn LedgerRepositoryTrait>,
    pub rewards: Arc<dyn RewardRepositoryTrait>,
    pub memberships: Arc<dyn MembershipRepositoryTrait>,
    pub notifications: Arc<dyn NotificationLogRepositoryTrait>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            programs: Arc::new(ProgramRepository::new(pool.clone())),
            customers: Arc::new(CustomerRepository::new(pool.clone())),
            ledger: Arc::new(LedgerRepository::new(pool.clone())),
            rewards: Arc::new(RewardRepository::new(pool.clone())),
            memberships: Arc::new(MembershipRepository::new(pool.clone())),
            notifications: Arc::new(NotificationLogRepository::new(pool)),
        }
    }

    /// 所有仓储共享同一个内存存储
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            programs: store.clone(),
            customers: store.clone(),
            ledger: store.clone(),
            rewards: store.clone(),
            memberships: store.clone(),
            notifications: store,
        }
    }
}
