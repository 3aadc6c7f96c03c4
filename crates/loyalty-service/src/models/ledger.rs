//! 积分账本
//!
//! 流水只追加不修改；余额是对流水的折叠（fold），`loyalty_balances` 表只是投影缓存，
//! 任何时候都可以由 [`replay`] 重新得到。
//!
//! 过期按 FIFO 计算：扣减（消费和过期）总是先消耗最早入账的积分，
//! 因此截止时刻之前入账、且尚未被消耗的部分 = max(0, 截止前入账总额 - 已扣减总额)。

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ActionType, ReferenceType, Tier, TransactionType};

/// 账本流水
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub program_id: Uuid,
    pub customer_id: Uuid,
    /// 带符号的积分变动
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub description: String,
    /// 消费金额，仅 earn_purchase 携带
    #[sqlx(default)]
    pub monetary_amount: Option<Decimal>,
    #[sqlx(default)]
    pub reference_type: Option<ReferenceType>,
    #[sqlx(default)]
    pub reference_id: Option<Uuid>,
    /// 触发行为，仅 earn_action 携带；周期上限按它统计，规则改版后仍然连续
    #[sqlx(default)]
    pub action_type: Option<ActionType>,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// 是否为入账（非过期的正向变动）
    pub fn is_credit(&self) -> bool {
        self.amount > 0 && self.transaction_type != TransactionType::Expiration
    }
}

/// 待追加的流水
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub program_id: Uuid,
    pub customer_id: Uuid,
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub description: String,
    pub monetary_amount: Option<Decimal>,
    pub reference_type: Option<ReferenceType>,
    pub reference_id: Option<Uuid>,
    pub action_type: Option<ActionType>,
}

impl NewTransaction {
    pub fn new(
        program_id: Uuid,
        customer_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            program_id,
            customer_id,
            amount,
            transaction_type,
            description: description.into(),
            monetary_amount: None,
            reference_type: None,
            reference_id: None,
            action_type: None,
        }
    }

    pub fn with_reference(mut self, reference_type: ReferenceType, reference_id: Uuid) -> Self {
        self.reference_type = Some(reference_type);
        self.reference_id = Some(reference_id);
        self
    }

    pub fn with_action_type(mut self, action_type: ActionType) -> Self {
        self.action_type = Some(action_type);
        self
    }

    pub fn with_monetary_amount(mut self, amount: Decimal) -> Self {
        self.monetary_amount = Some(amount);
        self
    }

    pub fn into_transaction(self, id: Uuid, created_at: DateTime<Utc>) -> LedgerTransaction {
        LedgerTransaction {
            id,
            program_id: self.program_id,
            customer_id: self.customer_id,
            amount: self.amount,
            transaction_type: self.transaction_type,
            description: self.description,
            monetary_amount: self.monetary_amount,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            action_type: self.action_type,
            created_at,
        }
    }
}

/// 追加流水时在同一事务内执行的检查
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendGuard {
    /// 无额外检查（入账）
    None,
    /// 扣减前校验余额充足
    RequireBalance,
    /// 行为奖励的周期上限：按行为统计 since 之后的 earn_action 并截断
    PeriodCap {
        action_type: ActionType,
        since: Option<DateTime<Utc>>,
        cap: i64,
    },
}

/// 流水折叠结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerTotals {
    pub total_earned: i64,
    pub total_spent: i64,
    pub total_expired: i64,
    pub lifetime_value: Decimal,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub next_expiry_at: Option<DateTime<Utc>>,
}

impl LedgerTotals {
    pub fn current_balance(&self) -> i64 {
        self.total_earned - self.total_spent - self.total_expired
    }

    /// 已被消费或过期消耗掉的积分
    pub fn consumed(&self) -> i64 {
        self.total_spent + self.total_expired
    }
}

/// 对客户的全部流水做一次折叠
///
/// `txs` 需按 created_at 升序。正向调整计入 earned，负向调整计入 spent。
pub fn replay(txs: &[LedgerTransaction], expiry_days: i32) -> LedgerTotals {
    let mut totals = LedgerTotals::default();

    for tx in txs {
        match tx.transaction_type {
            TransactionType::Expiration => totals.total_expired += tx.amount.abs(),
            _ if tx.amount >= 0 => totals.total_earned += tx.amount,
            _ => totals.total_spent += -tx.amount,
        }
        if tx.transaction_type == TransactionType::EarnPurchase {
            totals.lifetime_value += tx.monetary_amount.unwrap_or_default();
        }
        if tx.transaction_type != TransactionType::Expiration {
            totals.last_activity_at = Some(
                totals
                    .last_activity_at
                    .map_or(tx.created_at, |t| t.max(tx.created_at)),
            );
        }
    }

    totals.next_expiry_at = next_expiry_at(txs, totals.consumed(), expiry_days);
    totals
}

/// 截止时刻之前入账、尚未消耗、应当过期的积分
pub fn expiry_due(txs: &[LedgerTransaction], cutoff: DateTime<Utc>) -> i64 {
    let old_credits: i64 = txs
        .iter()
        .filter(|tx| tx.is_credit() && tx.created_at < cutoff)
        .map(|tx| tx.amount)
        .sum();
    let consumed = replay(txs, 0).consumed();
    (old_credits - consumed).max(0)
}

/// 最早一笔未被完全消耗的入账的到期时刻
fn next_expiry_at(
    txs: &[LedgerTransaction],
    consumed: i64,
    expiry_days: i32,
) -> Option<DateTime<Utc>> {
    if expiry_days <= 0 {
        return None;
    }
    let mut cumulative = 0;
    for tx in txs.iter().filter(|tx| tx.is_credit()) {
        cumulative += tx.amount;
        if cumulative > consumed {
            return Some(tx.created_at + Duration::days(expiry_days as i64));
        }
    }
    None
}

/// 余额投影（loyalty_balances 表）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub program_id: Uuid,
    pub customer_id: Uuid,
    pub total_earned: i64,
    pub total_spent: i64,
    pub total_expired: i64,
    pub current_balance: i64,
    pub lifetime_value: Decimal,
    pub tier: Tier,
    #[sqlx(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub next_expiry_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    pub fn from_totals(
        program_id: Uuid,
        customer_id: Uuid,
        totals: &LedgerTotals,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            program_id,
            customer_id,
            total_earned: totals.total_earned,
            total_spent: totals.total_spent,
            total_expired: totals.total_expired,
            current_balance: totals.current_balance(),
            lifetime_value: totals.lifetime_value,
            tier,
            last_activity_at: totals.last_activity_at,
            next_expiry_at: totals.next_expiry_at,
            updated_at: now,
        }
    }

    /// 两个投影的业务字段是否一致（忽略 updated_at）
    pub fn same_figures(&self, other: &Balance) -> bool {
        self.total_earned == other.total_earned
            && self.total_spent == other.total_spent
            && self.total_expired == other.total_expired
            && self.current_balance == other.current_balance
            && self.lifetime_value == other.lifetime_value
            && self.tier == other.tier
            && self.last_activity_at == other.last_activity_at
            && self.next_expiry_at == other.next_expiry_at
    }
}

/// 对账结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// 缓存投影是否与重放结果不一致（已被改写）
    pub drifted: bool,
    #[serde(default)]
    pub cached: Option<Balance>,
    pub replayed: Balance,
}
