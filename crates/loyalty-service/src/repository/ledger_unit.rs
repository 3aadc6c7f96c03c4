//! 记账单元
//!
//! Postgres 与内存实现在持有客户锁之后都调用 [`plan_write`]，
//! 保证两者的过期补记、余额校验和周期上限语义完全一致。

use uuid::Uuid;

use super::traits::LedgerContext;
use crate::error::{LoyaltyError, Result};
use crate::models::{
    ActionType, AppendGuard, Balance, LedgerTransaction, NewTransaction, TransactionType,
    clamp_to_cap, expiry_due, replay,
};

/// 锁内计算出的写入计划
#[derive(Debug, Clone)]
pub(crate) struct LedgerWrite {
    /// 需要补记的过期流水
    pub expiration: Option<LedgerTransaction>,
    /// 需要追加的业务流水
    pub appended: Option<LedgerTransaction>,
    /// 写入后的投影
    pub balance: Balance,
}

impl LedgerWrite {
    pub fn expired(&self) -> i64 {
        self.expiration.as_ref().map_or(0, |tx| -tx.amount)
    }

    /// 按追加顺序返回待写入的流水
    pub fn new_transactions(&self) -> impl Iterator<Item = &LedgerTransaction> {
        self.expiration.iter().chain(self.appended.iter())
    }
}

/// 根据已有流水计算本次写入
///
/// `history` 为该客户的全部流水（created_at 升序），`new` 为 None 时只做过期补记
pub(crate) fn plan_write(
    program_id: Uuid,
    customer_id: Uuid,
    history: &[LedgerTransaction],
    new: Option<NewTransaction>,
    guard: AppendGuard,
    ctx: &LedgerContext,
) -> Result<LedgerWrite> {
    let mut txs = history.to_vec();

    let cutoff = (ctx.expiry_days > 0)
        .then(|| ctx.now - chrono::Duration::days(ctx.expiry_days as i64));
    let expiration = match cutoff.map(|c| expiry_due(&txs, c)) {
        Some(due) if due > 0 => {
            let tx = NewTransaction::new(
                program_id,
                customer_id,
                -due,
                TransactionType::Expiration,
                format!("{} tokens expired", due),
            )
            .into_transaction(Uuid::now_v7(), ctx.now);
            txs.push(tx.clone());
            Some(tx)
        }
        _ => None,
    };

    let appended = match new {
        Some(mut new) => {
            match guard {
                AppendGuard::None => {}
                AppendGuard::RequireBalance => {
                    let available = replay(&txs, 0).current_balance();
                    if new.amount < 0 && available < -new.amount {
                        return Err(LoyaltyError::InsufficientBalance {
                            required: -new.amount,
                            available,
                        });
                    }
                }
                AppendGuard::PeriodCap {
                    action_type,
                    since,
                    cap,
                } => {
                    let earned = earned_for_action(&txs, action_type, since);
                    new.amount = clamp_to_cap(new.amount, earned, cap);
                }
            }

            let skip = matches!(guard, AppendGuard::PeriodCap { .. }) && new.amount == 0;
            if skip {
                None
            } else {
                let tx = new.into_transaction(Uuid::now_v7(), ctx.now);
                txs.push(tx.clone());
                Some(tx)
            }
        }
        None => None,
    };

    let totals = replay(&txs, ctx.expiry_days);
    let tier = ctx.tiers.classify_totals(&totals);
    let balance = Balance::from_totals(program_id, customer_id, &totals, tier, ctx.now);

    Ok(LedgerWrite {
        expiration,
        appended,
        balance,
    })
}

/// 某行为在窗口内已发放的积分
///
/// 不区分规则版本：同一行为的规则被改写后，已发放的积分仍计入上限
pub(crate) fn earned_for_action(
    txs: &[LedgerTransaction],
    action_type: ActionType,
    since: Option<chrono::DateTime<chrono::Utc>>,
) -> i64 {
    txs.iter()
        .filter(|tx| {
            tx.transaction_type == TransactionType::EarnAction
                && tx.action_type == Some(action_type)
                && since.is_none_or(|s| tx.created_at >= s)
        })
        .map(|tx| tx.amount)
        .sum()
}
