//! 奖励目录与兑换记录

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{RedemptionStatus, RewardType};
use crate::error::{LoyaltyError, Result};

/// 兑换码字符集，去掉了易混淆的 0/O/1/I
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 8;

/// 生成兑换码候选值，唯一性由调用方在事务内校验
pub fn generate_redemption_code() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("RD-{}", suffix)
}

/// 奖励目录项
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub id: Uuid,
    pub program_id: Uuid,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    pub reward_type: RewardType,
    pub tokens_required: i64,
    /// 总库存，None 表示不限量
    #[sqlx(default)]
    pub stock_limit: Option<i64>,
    pub stock_used: i64,
    /// 兑换后多少天内有效
    pub valid_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reward {
    pub fn has_stock(&self) -> bool {
        match self.stock_limit {
            Some(limit) => self.stock_used < limit,
            None => true,
        }
    }

    pub fn remaining_stock(&self) -> Option<i64> {
        self.stock_limit.map(|limit| (limit - self.stock_used).max(0))
    }

    /// 启用且有库存
    pub fn check_available(&self) -> Result<()> {
        if !self.is_active {
            return Err(LoyaltyError::validation(format!("奖励已下架: {}", self.id)));
        }
        if !self.has_stock() {
            return Err(LoyaltyError::StockExhausted { reward_id: self.id });
        }
        Ok(())
    }

    pub fn expires_at(&self, redeemed_at: DateTime<Utc>) -> DateTime<Utc> {
        redeemed_at + Duration::days(self.valid_days as i64)
    }
}

/// 创建奖励请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReward {
    pub program_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub reward_type: RewardType,
    pub tokens_required: i64,
    #[serde(default)]
    pub stock_limit: Option<i64>,
    pub valid_days: i32,
}

impl NewReward {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LoyaltyError::validation("奖励名称不能为空"));
        }
        if self.tokens_required <= 0 {
            return Err(LoyaltyError::validation("tokens_required 必须大于 0"));
        }
        if matches!(self.stock_limit, Some(limit) if limit < 0) {
            return Err(LoyaltyError::validation("stock_limit 不能为负"));
        }
        if self.valid_days <= 0 {
            return Err(LoyaltyError::validation("valid_days 必须大于 0"));
        }
        Ok(())
    }

    pub fn into_reward(self, id: Uuid, now: DateTime<Utc>) -> Reward {
        Reward {
            id,
            program_id: self.program_id,
            name: self.name,
            description: self.description,
            reward_type: self.reward_type,
            tokens_required: self.tokens_required,
            stock_limit: self.stock_limit,
            stock_used: 0,
            valid_days: self.valid_days,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 兑换记录
///
/// 创建即扣减积分，tokens_used 为兑换时的快照，不随奖励后续修改变化
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub id: Uuid,
    pub program_id: Uuid,
    pub customer_id: Uuid,
    pub reward_id: Uuid,
    pub code: String,
    pub tokens_used: i64,
    pub status: RedemptionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[sqlx(default)]
    pub used_at: Option<DateTime<Utc>>,
}

impl Redemption {
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// pending -> used
    pub fn mark_used(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != RedemptionStatus::Pending {
            return Err(self.transition_error(RedemptionStatus::Used));
        }
        self.status = RedemptionStatus::Used;
        self.used_at = Some(now);
        Ok(())
    }

    /// pending -> expired，仅在过期时间已过时生效
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == RedemptionStatus::Pending && self.is_past_due(now) {
            self.status = RedemptionStatus::Expired;
            return true;
        }
        false
    }

    pub fn transition_error(&self, to: RedemptionStatus) -> LoyaltyError {
        LoyaltyError::invalid_state("redemption", &self.code, self.status.as_str(), to.as_str())
    }
}

/// 兑换结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionReceipt {
    pub redemption: Redemption,
    pub balance_after: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reward(stock_limit: Option<i64>, stock_used: i64) -> Reward {
        NewReward {
            program_id: Uuid::nil(),
            name: "Free facial".to_string(),
            description: None,
            reward_type: RewardType::FreeService,
            tokens_required: 100,
            stock_limit,
            valid_days: 30,
        }
        .into_reward(Uuid::now_v7(), Utc::now())
        .with_stock_used(stock_used)
    }

    impl Reward {
        fn with_stock_used(mut self, used: i64) -> Self {
            self.stock_used = used;
            self
        }
    }

    #[test]
    fn test_generate_redemption_code_format() {
        let code = generate_redemption_code();
        assert!(code.starts_with("RD-"));
        assert_eq!(code.len(), 3 + CODE_LEN);
        assert!(
            code[3..]
                .bytes()
                .all(|b| CODE_ALPHABET.contains(&b))
        );
    }

    #[test]
    fn test_check_available() {
        assert!(reward(None, 0).check_available().is_ok());
        assert!(reward(Some(2), 1).check_available().is_ok());
        assert!(matches!(
            reward(Some(2), 2).check_available(),
            Err(LoyaltyError::StockExhausted { .. })
        ));

        let mut inactive = reward(None, 0);
        inactive.is_active = false;
        assert!(matches!(
            inactive.check_available(),
            Err(LoyaltyError::Validation(_))
        ));
    }

    #[test]
    fn test_remaining_stock() {
        assert_eq!(reward(Some(5), 3).remaining_stock(), Some(2));
        assert_eq!(reward(None, 3).remaining_stock(), None);
    }

    #[test]
    fn test_new_reward_validation() {
        let mut req = NewReward {
            program_id: Uuid::nil(),
            name: "Gift".to_string(),
            description: None,
            reward_type: RewardType::Gift,
            tokens_required: 10,
            stock_limit: Some(0),
            valid_days: 7,
        };
        assert!(req.validate().is_ok());
        req.valid_days = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_redemption_lifecycle() {
        let now = Utc::now();
        let mut r = Redemption {
            id: Uuid::now_v7(),
            program_id: Uuid::nil(),
            customer_id: Uuid::nil(),
            reward_id: Uuid::nil(),
            code: "RD-TEST0001".to_string(),
            tokens_used: 100,
            status: RedemptionStatus::Pending,
            created_at: now,
            expires_at: now + Duration::days(1),
            used_at: None,
        };

        assert!(!r.expire_if_due(now));
        r.mark_used(now).unwrap();
        assert_eq!(r.status, RedemptionStatus::Used);
        assert_eq!(r.used_at, Some(now));

        let err = r.mark_used(now).unwrap_err();
        assert!(matches!(err, LoyaltyError::InvalidStateTransition { .. }));
        // 终态不会再被过期
        assert!(!r.expire_if_due(now + Duration::days(2)));
    }
}
