//! 积分服务枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx，varchar 存储）和 JSON（serde）序列化，
//! 统一使用 snake_case 取值，与数据库中的字面值一致。

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// 触发积分的客户行为
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ActionType {
    /// 消费
    Purchase,
    /// 到店预约
    Appointment,
    /// 推荐新客
    Referral,
    /// 评价
    Review,
    /// 注册
    Signup,
    /// 生日
    Birthday,
    /// 自定义行为
    Custom,
}

/// 积分上限的统计周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum PeriodType {
    Day,
    /// ISO 周，周一为起点
    Week,
    Month,
    Year,
    /// 不分周期，累计计算
    Lifetime,
}

impl PeriodType {
    /// 当前周期窗口的起点（UTC）
    ///
    /// `Lifetime` 没有起点，返回 None 表示统计全部历史
    pub fn window_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.date_naive();
        let start = match self {
            Self::Day => today,
            Self::Week => today - Duration::days(today.weekday().num_days_from_monday() as i64),
            Self::Month => today.with_day(1)?,
            Self::Year => NaiveDate::from_ymd_opt(today.year(), 1, 1)?,
            Self::Lifetime => return None,
        };
        Some(Utc.from_utc_datetime(&start.and_hms_opt(0, 0, 0)?))
    }
}

/// 账本流水类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum TransactionType {
    /// 消费返积分（+）
    EarnPurchase,
    /// 行为奖励（+）
    EarnAction,
    /// 兑换扣减（-）
    Spend,
    /// 人工调整（±）
    Adjustment,
    /// 过期（-），由系统生成
    Expiration,
    /// 手工发放（+）
    Manual,
}

impl TransactionType {
    /// 计入 total_earned 的类型
    pub fn is_earn(&self) -> bool {
        matches!(self, Self::EarnPurchase | Self::EarnAction | Self::Manual)
    }

    /// 指标标签
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EarnPurchase => "earn_purchase",
            Self::EarnAction => "earn_action",
            Self::Spend => "spend",
            Self::Adjustment => "adjustment",
            Self::Expiration => "expiration",
            Self::Manual => "manual",
        }
    }
}

/// 流水关联实体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ReferenceType {
    Redemption,
    Rule,
    Manual,
    Purchase,
}

/// 客户等级，按声明顺序递增
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Platinum,
}

/// 奖励类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RewardType {
    /// 百分比折扣
    DiscountPercentage,
    /// 固定金额折扣
    DiscountFixed,
    /// 免费服务
    FreeService,
    /// 礼品
    Gift,
    /// 服务升级
    Upgrade,
    Custom,
}

/// 兑换记录状态
///
/// pending -> used | expired，后两者为终态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RedemptionStatus {
    #[default]
    Pending,
    Used,
    Expired,
}

impl RedemptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Used => "used",
            Self::Expired => "expired",
        }
    }
}

/// 会员状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum MembershipStatus {
    /// 等待支付确认
    #[default]
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl MembershipStatus {
    /// 状态机允许的迁移
    ///
    /// expired 与 cancelled 为终态，重新订阅需要新建会员记录
    pub fn can_transition_to(&self, target: MembershipStatus) -> bool {
        use MembershipStatus::*;
        matches!(
            (self, target),
            (Pending, Active) | (Pending, Cancelled) | (Active, Expired) | (Active, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

/// 计费周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Annual,
}

impl BillingCycle {
    /// 从某天起推进一个周期
    ///
    /// 月末按 chrono 规则截断，如 01-31 推进一个月为 02-28/29
    pub fn advance(&self, from: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Monthly => from.checked_add_months(Months::new(1)),
            Self::Annual => from.checked_add_months(Months::new(12)),
        }
    }
}

/// 生命周期消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum MessageType {
    /// 会员续费提醒
    MembershipReminder,
    /// 沉睡客户召回，每个客户终身一次
    Reactivation,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MembershipReminder => "membership_reminder",
            Self::Reactivation => "reactivation",
        }
    }
}
