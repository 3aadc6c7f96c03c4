//! 会员计划与会员记录
//!
//! 状态机：pending -> active -> {expired | cancelled}，pending 也可直接取消。
//! expired / cancelled 为终态，重新订阅需要新建记录。

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::enums::{BillingCycle, MembershipStatus};
use crate::error::{LoyaltyError, Result};

/// 会员计划（模板）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MembershipPlan {
    pub id: Uuid,
    pub program_id: Uuid,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    /// 月付价格，None 表示不提供月付
    #[sqlx(default)]
    pub monthly_price: Option<Decimal>,
    #[sqlx(default)]
    pub annual_price: Option<Decimal>,
    /// 权益列表（JSON 数组）
    pub benefits: Value,
    /// 会员期间积分倍率
    pub tokens_multiplier: Decimal,
    pub priority_booking: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl MembershipPlan {
    pub fn price_for(&self, cycle: BillingCycle) -> Option<Decimal> {
        match cycle {
            BillingCycle::Monthly => self.monthly_price,
            BillingCycle::Annual => self.annual_price,
        }
    }
}

/// 创建会员计划请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMembershipPlan {
    pub program_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub monthly_price: Option<Decimal>,
    #[serde(default)]
    pub annual_price: Option<Decimal>,
    #[serde(default)]
    pub benefits: Value,
    pub tokens_multiplier: Decimal,
    #[serde(default)]
    pub priority_booking: bool,
}

impl NewMembershipPlan {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LoyaltyError::validation("会员计划名称不能为空"));
        }
        if self.monthly_price.is_none() && self.annual_price.is_none() {
            return Err(LoyaltyError::validation("至少需要提供月付或年付价格"));
        }
        for price in [self.monthly_price, self.annual_price].into_iter().flatten() {
            if price < Decimal::ZERO {
                return Err(LoyaltyError::validation("价格不能为负"));
            }
        }
        if self.tokens_multiplier <= Decimal::ZERO {
            return Err(LoyaltyError::validation("tokens_multiplier 必须大于 0"));
        }
        Ok(())
    }

    pub fn into_plan(self, id: Uuid, now: DateTime<Utc>) -> MembershipPlan {
        let benefits = if self.benefits.is_null() {
            Value::Array(Vec::new())
        } else {
            self.benefits
        };
        MembershipPlan {
            id,
            program_id: self.program_id,
            name: self.name,
            description: self.description,
            monthly_price: self.monthly_price,
            annual_price: self.annual_price,
            benefits,
            tokens_multiplier: self.tokens_multiplier,
            priority_booking: self.priority_booking,
            is_active: true,
            created_at: now,
        }
    }
}

/// 会员记录
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub id: Uuid,
    pub program_id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub status: MembershipStatus,
    pub billing_cycle: BillingCycle,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub auto_renew: bool,
    /// 支付方式与金额只是记录事实，不代表已结算
    #[sqlx(default)]
    pub payment_method: Option<String>,
    #[sqlx(default)]
    pub payment_amount: Option<Decimal>,
    #[sqlx(default)]
    pub notes: Option<String>,
    #[sqlx(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    fn transition(&mut self, target: MembershipStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(LoyaltyError::invalid_state(
                "membership",
                self.id,
                self.status.as_str(),
                target.as_str(),
            ));
        }
        self.status = target;
        self.updated_at = now;
        Ok(())
    }

    /// pending -> active，周期从激活当天重新计算
    pub fn activate(
        &mut self,
        today: NaiveDate,
        payment_amount: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let end_date = advance_or_invalid(self.billing_cycle, today)?;
        self.transition(MembershipStatus::Active, now)?;
        self.start_date = today;
        self.end_date = end_date;
        if payment_amount.is_some() {
            self.payment_amount = payment_amount;
        }
        Ok(())
    }

    /// 立即取消，不设宽限期
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(MembershipStatus::Cancelled, now)?;
        self.cancelled_at = Some(now);
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(MembershipStatus::Expired, now)
    }

    /// 续期一个周期，状态保持 active
    pub fn renew(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != MembershipStatus::Active {
            return Err(LoyaltyError::invalid_state(
                "membership",
                self.id,
                self.status.as_str(),
                "renewed",
            ));
        }
        self.end_date = advance_or_invalid(self.billing_cycle, self.end_date)?;
        self.updated_at = now;
        Ok(())
    }

    /// 结束日已过（today > end_date）
    pub fn is_past_end(&self, today: NaiveDate) -> bool {
        today > self.end_date
    }

    pub fn days_remaining(&self, today: NaiveDate) -> i64 {
        (self.end_date - today).num_days()
    }
}

fn advance_or_invalid(cycle: BillingCycle, from: NaiveDate) -> Result<NaiveDate> {
    cycle
        .advance(from)
        .ok_or_else(|| LoyaltyError::validation(format!("无法从 {} 推进计费周期", from)))
}

/// 创建会员请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMembership {
    pub program_id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub billing_cycle: BillingCycle,
    #[serde(default)]
    pub auto_renew: bool,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// 支付为异步流程时先创建 pending，等待 activate
    #[serde(default)]
    pub payment_pending: bool,
}

impl NewMembership {
    /// 生成会员记录，价格取计划对应周期的价格
    pub fn into_membership(
        self,
        id: Uuid,
        plan: &MembershipPlan,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Membership> {
        let price = plan.price_for(self.billing_cycle).ok_or_else(|| {
            LoyaltyError::validation(format!(
                "会员计划 {} 不支持 {:?} 计费",
                plan.id, self.billing_cycle
            ))
        })?;
        let end_date = advance_or_invalid(self.billing_cycle, today)?;
        let status = if self.payment_pending {
            MembershipStatus::Pending
        } else {
            MembershipStatus::Active
        };

        Ok(Membership {
            id,
            program_id: self.program_id,
            customer_id: self.customer_id,
            plan_id: plan.id,
            status,
            billing_cycle: self.billing_cycle,
            start_date: today,
            end_date,
            auto_renew: self.auto_renew,
            payment_method: self.payment_method,
            payment_amount: (!self.payment_pending).then_some(price),
            notes: self.notes,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// 会员到期扫描结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipSweepReport {
    pub renewed: u64,
    pub expired: u64,
}
