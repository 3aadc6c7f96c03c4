//! 积分计划与积分规则

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ActionType, PeriodType};
use crate::error::{LoyaltyError, Result};

/// 积分计划
///
/// 每个租户最多一个启用中的计划，承载积分命名、消费返积分比例、
/// 过期天数以及两类生命周期消息的触发参数
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// 租户展示名，用于消息模板
    pub tenant_name: String,
    pub name: String,
    /// 积分在该租户下的叫法，如 "points"、"豆"
    pub currency_name: String,
    /// 每单位消费金额返多少积分
    pub tokens_per_currency: Decimal,
    /// 单笔消费低于该金额不返积分
    pub tokens_currency_threshold: Decimal,
    /// 积分有效天数，0 表示永不过期
    pub tokens_expiry_days: i32,
    /// 多少个月未互动视为沉睡客户
    pub reactivation_months: i32,
    /// 会员到期前多少天发送续费提醒
    pub membership_reminder_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Program {
    /// 消费返积分：低于门槛返 0，否则向下取整
    pub fn purchase_tokens(&self, amount: Decimal, membership_multiplier: Decimal) -> i64 {
        if amount <= Decimal::ZERO || amount < self.tokens_currency_threshold {
            return 0;
        }
        (amount * self.tokens_per_currency * membership_multiplier)
            .floor()
            .to_i64()
            .unwrap_or(0)
            .max(0)
    }

    /// 最后互动早于该日期的客户视为沉睡
    pub fn reactivation_cutoff(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_sub_months(Months::new(self.reactivation_months.max(1) as u32))
            .unwrap_or(today)
    }

    /// 今天需要提醒的会员到期日
    pub fn reminder_date(&self, today: NaiveDate) -> NaiveDate {
        today + Duration::days(self.membership_reminder_days.max(0) as i64)
    }
}

/// 创建积分计划请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProgram {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub name: String,
    pub currency_name: String,
    pub tokens_per_currency: Decimal,
    pub tokens_currency_threshold: Decimal,
    pub tokens_expiry_days: i32,
    pub reactivation_months: i32,
    pub membership_reminder_days: i32,
}

impl NewProgram {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LoyaltyError::validation("计划名称不能为空"));
        }
        if self.tokens_per_currency < Decimal::ZERO {
            return Err(LoyaltyError::validation("tokens_per_currency 不能为负"));
        }
        if self.tokens_currency_threshold < Decimal::ZERO {
            return Err(LoyaltyError::validation("tokens_currency_threshold 不能为负"));
        }
        if self.tokens_expiry_days < 0 {
            return Err(LoyaltyError::validation("tokens_expiry_days 不能为负"));
        }
        if self.reactivation_months < 1 {
            return Err(LoyaltyError::validation("reactivation_months 至少为 1"));
        }
        if self.membership_reminder_days < 0 {
            return Err(LoyaltyError::validation("membership_reminder_days 不能为负"));
        }
        Ok(())
    }

    pub fn into_program(self, id: Uuid, now: DateTime<Utc>) -> Program {
        Program {
            id,
            tenant_id: self.tenant_id,
            tenant_name: self.tenant_name,
            name: self.name,
            currency_name: self.currency_name,
            tokens_per_currency: self.tokens_per_currency,
            tokens_currency_threshold: self.tokens_currency_threshold,
            tokens_expiry_days: self.tokens_expiry_days,
            reactivation_months: self.reactivation_months,
            membership_reminder_days: self.membership_reminder_days,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 积分规则：行为 -> 积分
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TokenRule {
    pub id: Uuid,
    pub program_id: Uuid,
    pub action_type: ActionType,
    pub base_amount: i64,
    pub multiplier: Decimal,
    /// 周期内最多可得积分
    #[sqlx(default)]
    pub max_per_period: Option<i64>,
    #[sqlx(default)]
    pub period_type: Option<PeriodType>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl TokenRule {
    pub fn validate(&self) -> Result<()> {
        if self.base_amount < 0 {
            return Err(LoyaltyError::validation("base_amount 不能为负"));
        }
        if self.multiplier <= Decimal::ZERO {
            return Err(LoyaltyError::validation("multiplier 必须大于 0"));
        }
        if let Some(cap) = self.max_per_period {
            if cap < 0 {
                return Err(LoyaltyError::validation("max_per_period 不能为负"));
            }
            if self.period_type.is_none() {
                return Err(LoyaltyError::validation(
                    "设置 max_per_period 时必须指定 period_type",
                ));
            }
        }
        Ok(())
    }

    /// base_amount × multiplier × 会员倍率，向下取整
    pub fn award(&self, membership_multiplier: Decimal) -> i64 {
        (Decimal::from(self.base_amount) * self.multiplier * membership_multiplier)
            .floor()
            .to_i64()
            .unwrap_or(0)
            .max(0)
    }

    /// 周期上限对应的统计起点
    ///
    /// 外层 None 表示无上限；内层 None 表示 lifetime，统计全部历史
    pub fn cap_window(&self, now: DateTime<Utc>) -> Option<(i64, Option<DateTime<Utc>>)> {
        let cap = self.max_per_period?;
        let period = self.period_type?;
        Some((cap, period.window_start(now)))
    }
}

/// 从同一行为的多条规则中挑出生效规则
///
/// 只看启用的规则，创建时间最新者胜出
pub fn select_rule(rules: &[TokenRule], action_type: ActionType) -> Option<&TokenRule> {
    rules
        .iter()
        .filter(|r| r.is_active && r.action_type == action_type)
        .max_by_key(|r| r.created_at)
}

/// 按周期上限截断本次奖励，结果不小于 0
pub fn clamp_to_cap(award: i64, earned_in_window: i64, cap: i64) -> i64 {
    award.min(cap - earned_in_window).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn program() -> Program {
        NewProgram {
            tenant_id: Uuid::now_v7(),
            tenant_name: "Clinic".to_string(),
            name: "VIP".to_string(),
            currency_name: "points".to_string(),
            tokens_per_currency: dec("1"),
            tokens_currency_threshold: dec("10"),
            tokens_expiry_days: 30,
            reactivation_months: 3,
            membership_reminder_days: 7,
        }
        .into_program(Uuid::now_v7(), Utc::now())
    }

    fn rule(created_secs: i64, active: bool) -> TokenRule {
        TokenRule {
            id: Uuid::now_v7(),
            program_id: Uuid::now_v7(),
            action_type: ActionType::Appointment,
            base_amount: 10,
            multiplier: dec("1.5"),
            max_per_period: None,
            period_type: None,
            is_active: active,
            created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_purchase_tokens_threshold_and_floor() {
        let p = program();
        assert_eq!(p.purchase_tokens(dec("9.99"), Decimal::ONE), 0);
        assert_eq!(p.purchase_tokens(dec("50.75"), Decimal::ONE), 50);
        assert_eq!(p.purchase_tokens(dec("50"), dec("1.5")), 75);
        assert_eq!(p.purchase_tokens(dec("-5"), Decimal::ONE), 0);
    }

    #[test]
    fn test_cutoffs() {
        let p = program();
        let today = NaiveDate::from_ymd_opt(2025, 5, 31).unwrap();
        assert_eq!(
            p.reactivation_cutoff(today),
            NaiveDate::from_ymd_opt(2025, 2, 28).unwrap()
        );
        assert_eq!(
            p.reminder_date(today),
            NaiveDate::from_ymd_opt(2025, 6, 7).unwrap()
        );
    }

    #[test]
    fn test_new_program_validation() {
        let mut req = NewProgram {
            tenant_id: Uuid::now_v7(),
            tenant_name: "Clinic".to_string(),
            name: "VIP".to_string(),
            currency_name: "points".to_string(),
            tokens_per_currency: dec("1"),
            tokens_currency_threshold: Decimal::ZERO,
            tokens_expiry_days: 0,
            reactivation_months: 3,
            membership_reminder_days: 7,
        };
        assert!(req.validate().is_ok());

        req.reactivation_months = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_rule_validation() {
        let mut r = rule(0, true);
        assert!(r.validate().is_ok());

        r.max_per_period = Some(100);
        assert!(r.validate().is_err());

        r.period_type = Some(PeriodType::Month);
        assert!(r.validate().is_ok());

        r.multiplier = Decimal::ZERO;
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_rule_award_floors() {
        let r = rule(0, true);
        assert_eq!(r.award(Decimal::ONE), 15);
        assert_eq!(r.award(dec("1.25")), 18);
    }

    #[test]
    fn test_select_rule_latest_active_wins() {
        let old = rule(100, true);
        let newer = rule(200, true);
        let newest_inactive = rule(300, false);
        let rules = vec![old, newer.clone(), newest_inactive];

        let selected = select_rule(&rules, ActionType::Appointment).unwrap();
        assert_eq!(selected.id, newer.id);
        assert!(select_rule(&rules, ActionType::Review).is_none());
    }

    #[test]
    fn test_clamp_to_cap() {
        assert_eq!(clamp_to_cap(10, 0, 25), 10);
        assert_eq!(clamp_to_cap(10, 20, 25), 5);
        assert_eq!(clamp_to_cap(10, 25, 25), 0);
        assert_eq!(clamp_to_cap(10, 30, 25), 0);
    }
}
