//! 服务共享上下文

use loyalty_shared::clock::{Clock, SharedClock};
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use crate::error::{LoyaltyError, Result};
use crate::models::Program;
use crate::repository::{LedgerContext, Repositories};
use crate::tier::TierClassifier;

/// 各服务共用的仓储、时钟与等级配置
#[derive(Clone)]
pub struct ServiceContext {
    pub repos: Repositories,
    pub clock: SharedClock,
    pub tiers: TierClassifier,
}

impl ServiceContext {
    pub fn new(repos: Repositories, clock: SharedClock, tiers: TierClassifier) -> Self {
        Self {
            repos,
            clock,
            tiers,
        }
    }

    /// 读取启用中的计划，停用视同不存在
    pub async fn active_program(&self, program_id: Uuid) -> Result<Program> {
        self.repos
            .programs
            .get_program(program_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| LoyaltyError::not_found("program", program_id))
    }

    pub fn ledger_context(&self, program: &Program) -> LedgerContext {
        LedgerContext {
            expiry_days: program.tokens_expiry_days,
            tiers: self.tiers,
            now: self.clock.now(),
        }
    }

    /// 客户当前有效会员的积分倍率，无会员时为 1
    pub async fn membership_multiplier(&self, program_id: Uuid, customer_id: Uuid) -> Result<Decimal> {
        let multiplier = self
            .repos
            .memberships
            .active_multiplier(program_id, customer_id, self.clock.today())
            .await?;
        Ok(multiplier.unwrap_or(Decimal::ONE))
    }

    /// 记录客户互动（会员开通、核销等非账本行为）
    ///
    /// 主操作已经成功，更新失败只记录告警
    pub async fn record_interaction(&self, customer_id: Uuid) {
        if let Err(e) = self
            .repos
            .customers
            .touch_customer(customer_id, self.clock.now())
            .await
        {
            warn!(%customer_id, error = %e, "更新客户最近互动时间失败");
        }
    }
}
