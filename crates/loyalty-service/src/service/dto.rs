//! 服务层数据传输对象
//!
//! 定义服务层与外部交互使用的 DTO，与内部领域模型解耦

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, LoyaltyError};
use crate::models::{
    ActionType, Balance, LedgerTransaction, PeriodType, ReferenceType, TransactionType,
};

/// 入账/扣减请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMovementRequest {
    pub program_id: Uuid,
    pub customer_id: Uuid,
    /// 正数，方向由调用的操作决定
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<ReferenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<Uuid>,
}

impl TokenMovementRequest {
    pub fn reference(&self) -> Option<(ReferenceType, Uuid)> {
        self.reference_type.zip(self.reference_id)
    }
}

/// 行为奖励的附加信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// 一次积分变动的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntryResult {
    /// 实际入账或扣减的积分（带符号）
    pub tokens: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<LedgerTransaction>,
    /// 本次顺带补记的过期积分
    pub expired: i64,
    pub balance: Balance,
}

/// 规则评估结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluation {
    pub rule_id: Uuid,
    pub action_type: ActionType,
    /// 截断前的奖励（已乘会员倍率）
    pub base_award: i64,
    /// 按周期上限截断后的奖励
    pub tokens_awarded: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_start: Option<DateTime<Utc>>,
}

/// 新增或修改积分规则
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertRuleRequest {
    /// 为空时新建
    #[serde(default)]
    pub id: Option<Uuid>,
    pub program_id: Uuid,
    pub action_type: ActionType,
    pub base_amount: i64,
    pub multiplier: Decimal,
    #[serde(default)]
    pub max_per_period: Option<i64>,
    #[serde(default)]
    pub period_type: Option<PeriodType>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// 客户建档/更新
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertCustomerRequest {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// 到期积分扫描结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirySweepReport {
    pub customers: u64,
    pub tokens_expired: i64,
    pub errors: u64,
}

/// 统计周期
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsPeriod {
    Day,
    Week,
    #[default]
    Month,
    Year,
    All,
}

impl StatsPeriod {
    /// 窗口起点，All 返回 None
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let period = match self {
            Self::Day => PeriodType::Day,
            Self::Week => PeriodType::Week,
            Self::Month => PeriodType::Month,
            Self::Year => PeriodType::Year,
            Self::All => PeriodType::Lifetime,
        };
        period.window_start(now)
    }
}

/// 计划运营统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyStats {
    pub period: StatsPeriod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    pub tokens_issued: i64,
    pub tokens_spent: i64,
    pub tokens_expired: i64,
    pub redemptions_created: i64,
    pub redemptions_used: i64,
    pub memberships_created: i64,
    pub active_memberships: i64,
    pub active_customers: i64,
}

/// 对外统一响应
///
/// 失败时 `error` 给出错误分类，`message` 给出可读描述，不抛出异常
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn fail(err: &LoyaltyError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.kind()),
            message: Some(err.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.success
    }
}

impl<T> From<crate::error::Result<T>> for ApiResponse<T> {
    fn from(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::fail(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stats_period_since() {
        // 2025-03-12 是周三
        let now = Utc.with_ymd_and_hms(2025, 3, 12, 15, 30, 0).unwrap();
        let at = |m, d| Utc.with_ymd_and_hms(2025, m, d, 0, 0, 0).unwrap();

        assert_eq!(StatsPeriod::Day.since(now), Some(at(3, 12)));
        assert_eq!(StatsPeriod::Week.since(now), Some(at(3, 10)));
        assert_eq!(StatsPeriod::Month.since(now), Some(at(3, 1)));
        assert_eq!(StatsPeriod::Year.since(now), Some(at(1, 1)));
        assert_eq!(StatsPeriod::All.since(now), None);
    }

    #[test]
    fn test_api_response_failure_shape() {
        let err = LoyaltyError::InsufficientBalance {
            required: 100,
            available: 80,
        };
        let resp: ApiResponse<()> = Err(err).into();
        assert!(!resp.is_ok());
        assert_eq!(resp.error, Some(ErrorKind::InsufficientBalance));

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "InsufficientBalance");
        assert!(json.get("data").is_none());
    }
}
