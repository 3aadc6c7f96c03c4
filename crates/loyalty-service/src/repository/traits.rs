//! 仓储 Trait 定义
//!
//! 服务层依赖这些抽象而非具体实现。需要原子完成的业务单元（记账、兑换、幂等写日志）
//! 各自是一个仓储方法，由实现方保证在同一个事务（或同一把锁）内完成。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ActionType, AppendGuard, Balance, Customer, LedgerTransaction, Membership, MembershipPlan,
    MembershipStatus, MessageType, NewTransaction, NotificationLogEntry, Program,
    ReconcileReport, Redemption, RedemptionReceipt, Reward, TokenRule,
};
use crate::tier::TierClassifier;

/// 记账时需要的计划参数
#[derive(Debug, Clone, Copy)]
pub struct LedgerContext {
    /// 积分有效天数，0 表示永不过期
    pub expiry_days: i32,
    pub tiers: TierClassifier,
    pub now: DateTime<Utc>,
}

/// 一次记账的结果
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    /// 本次顺带补记的过期积分
    pub expired: i64,
    /// 实际追加的流水；周期上限截断为 0 时为 None
    pub transaction: Option<LedgerTransaction>,
    pub balance: Balance,
}

/// 兑换请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeemCommand {
    pub program_id: Uuid,
    pub customer_id: Uuid,
    pub reward_id: Uuid,
}

/// 账本统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub tokens_issued: i64,
    pub tokens_spent: i64,
    pub tokens_expired: i64,
    /// 窗口内有非过期流水的客户数
    pub active_customers: i64,
}

/// 即将到期的会员，连同客户名和计划名一起查出
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringMembership {
    #[sqlx(flatten)]
    pub membership: Membership,
    pub customer_name: String,
    pub plan_name: String,
}

/// 积分计划仓储接口
#[async_trait]
pub trait ProgramRepositoryTrait: Send + Sync {
    /// 同一租户已有启用中的计划时返回 Validation 错误
    async fn create_program(&self, program: &Program) -> Result<()>;
    async fn get_program(&self, id: Uuid) -> Result<Option<Program>>;
    async fn get_active_program(&self, tenant_id: Uuid) -> Result<Option<Program>>;
    async fn list_active_programs(&self) -> Result<Vec<Program>>;

    async fn upsert_rule(&self, rule: &TokenRule) -> Result<()>;
    async fn list_rules(&self, program_id: Uuid, action_type: ActionType)
    -> Result<Vec<TokenRule>>;
}

/// 客户仓储接口
#[async_trait]
pub trait CustomerRepositoryTrait: Send + Sync {
    async fn upsert_customer(&self, customer: &Customer) -> Result<()>;
    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>>;
    async fn touch_customer(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
    /// 最后互动（无记录时取建档时间）早于 cutoff 的客户
    async fn list_inactive_customers(
        &self,
        tenant_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Customer>>;
}

/// 积分账本仓储接口
#[async_trait]
pub trait LedgerRepositoryTrait: Send + Sync {
    /// 锁定客户余额 -> 补记过期 -> 执行 guard -> 追加流水 -> 重放并写回投影 -> 更新客户互动时间
    async fn append(
        &self,
        tx: NewTransaction,
        guard: AppendGuard,
        ctx: &LedgerContext,
    ) -> Result<AppendOutcome>;

    /// 只补记过期，不追加业务流水
    async fn apply_expiry(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        ctx: &LedgerContext,
    ) -> Result<AppendOutcome>;

    /// 读取缓存投影
    async fn get_balance(&self, program_id: Uuid, customer_id: Uuid) -> Result<Option<Balance>>;

    /// 按时间倒序
    async fn list_transactions(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        limit: i64,
    ) -> Result<Vec<LedgerTransaction>>;

    /// 重放流水并与缓存投影比较，不一致时改写投影
    async fn reconcile(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        ctx: &LedgerContext,
    ) -> Result<ReconcileReport>;

    /// 某行为自 since 起已发放的积分（跨规则版本）
    async fn earned_for_action_since(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        action_type: ActionType,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64>;

    /// next_expiry_at 不晚于 at 的客户
    async fn list_customers_due_expiry(
        &self,
        program_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>>;

    async fn ledger_stats(
        &self,
        program_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<LedgerStats>;
}

/// 奖励与兑换仓储接口
#[async_trait]
pub trait RewardRepositoryTrait: Send + Sync {
    async fn create_reward(&self, reward: &Reward) -> Result<()>;
    async fn get_reward(&self, id: Uuid) -> Result<Option<Reward>>;
    async fn set_reward_active(&self, id: Uuid, active: bool, now: DateTime<Utc>)
    -> Result<bool>;
    /// 按所需积分升序
    async fn list_active_rewards(&self, program_id: Uuid) -> Result<Vec<Reward>>;

    /// 扣积分、占库存、生成兑换码、写兑换记录，四者原子完成
    async fn redeem(&self, cmd: RedeemCommand, ctx: &LedgerContext)
    -> Result<RedemptionReceipt>;

    async fn get_redemption_by_code(
        &self,
        program_id: Uuid,
        code: &str,
    ) -> Result<Option<Redemption>>;
    async fn list_customer_redemptions(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<Redemption>>;

    /// pending -> used；已过期的 pending 记录先转为 expired 再返回状态错误
    async fn mark_redemption_used(
        &self,
        program_id: Uuid,
        redemption_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Redemption>;

    /// 将过期的 pending 记录转为 expired，返回处理条数
    async fn expire_redemptions(&self, program_id: Uuid, now: DateTime<Utc>) -> Result<u64>;

    /// (窗口内创建数, 窗口内核销数)
    async fn redemption_stats(
        &self,
        program_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<(i64, i64)>;
}

/// 会员仓储接口
#[async_trait]
pub trait MembershipRepositoryTrait: Send + Sync {
    async fn create_plan(&self, plan: &MembershipPlan) -> Result<()>;
    async fn get_plan(&self, id: Uuid) -> Result<Option<MembershipPlan>>;
    async fn list_plans(&self, program_id: Uuid) -> Result<Vec<MembershipPlan>>;

    async fn create_membership(&self, membership: &Membership) -> Result<()>;
    async fn get_membership(&self, id: Uuid) -> Result<Option<Membership>>;

    /// 乐观更新：仅当库中状态仍为 expected 时写入，返回是否写入成功
    async fn update_membership(
        &self,
        membership: &Membership,
        expected: MembershipStatus,
    ) -> Result<bool>;

    /// active 且 end_date 恰为 date 的会员
    async fn list_active_ending_on(
        &self,
        program_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<ExpiringMembership>>;

    /// active 且 end_date 早于 today 的会员
    async fn list_due_for_sweep(&self, program_id: Uuid, today: NaiveDate)
    -> Result<Vec<Membership>>;

    /// 客户当前有效会员中最大的积分倍率
    async fn active_multiplier(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        today: NaiveDate,
    ) -> Result<Option<Decimal>>;

    async fn get_active_membership(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        today: NaiveDate,
    ) -> Result<Option<Membership>>;

    /// (窗口内新建数, 当前 active 数)
    async fn membership_stats(
        &self,
        program_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<(i64, i64)>;
}

/// 消息幂等日志仓储接口
#[async_trait]
pub trait NotificationLogRepositoryTrait: Send + Sync {
    /// since 为 None 时检查全部历史
    async fn exists(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        message_type: MessageType,
        since: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// 回看窗口内无记录且唯一键不冲突时写入，返回是否写入
    async fn try_record(
        &self,
        entry: &NotificationLogEntry,
        lookback_since: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    async fn list_for_customer(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<NotificationLogEntry>>;
}
