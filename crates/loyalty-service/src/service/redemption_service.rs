//! 奖励兑换服务
//!
//! 处理奖励目录与兑换记录：
//! - 兑换时扣积分、占库存、生成兑换码、写兑换记录在同一事务内完成
//! - 核销只允许 pending -> used，过期记录不退积分
//!
//! ## 兑换流程
//!
//! 1. 奖励启用与库存检查 -> 2. 锁客户余额并扣减 -> 3. 库存 +1
//!    -> 4. 生成唯一兑换码 -> 5. 写兑换记录 -> 6. 提交

use loyalty_shared::clock::Clock;
use loyalty_shared::observability::metrics;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::context::ServiceContext;
use crate::error::{LoyaltyError, Result};
use crate::models::{NewReward, Redemption, RedemptionReceipt, Reward};
use crate::repository::RedeemCommand;

pub struct RedemptionService {
    ctx: ServiceContext,
}

impl RedemptionService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    // ==================== 奖励目录 ====================

    #[instrument(skip(self, request), fields(program_id = %request.program_id, name = %request.name))]
    pub async fn create_reward(&self, request: NewReward) -> Result<Reward> {
        request.validate()?;
        self.ctx.active_program(request.program_id).await?;

        let reward = request.into_reward(Uuid::now_v7(), self.ctx.clock.now());
        self.ctx.repos.rewards.create_reward(&reward).await?;

        info!(reward_id = %reward.id, tokens_required = reward.tokens_required, "奖励已创建");
        Ok(reward)
    }

    pub async fn get_reward(&self, reward_id: Uuid) -> Result<Reward> {
        self.ctx
            .repos
            .rewards
            .get_reward(reward_id)
            .await?
            .ok_or_else(|| LoyaltyError::not_found("reward", reward_id))
    }

    /// 上架/下架
    #[instrument(skip(self))]
    pub async fn set_reward_active(&self, reward_id: Uuid, active: bool) -> Result<Reward> {
        let updated = self
            .ctx
            .repos
            .rewards
            .set_reward_active(reward_id, active, self.ctx.clock.now())
            .await?;
        if !updated {
            return Err(LoyaltyError::not_found("reward", reward_id));
        }
        self.get_reward(reward_id).await
    }

    /// 按所需积分升序
    pub async fn list_active_rewards(&self, program_id: Uuid) -> Result<Vec<Reward>> {
        self.ctx.repos.rewards.list_active_rewards(program_id).await
    }

    /// 客户当前余额可兑换的最便宜奖励（有库存）
    pub async fn cheapest_affordable_reward(
        &self,
        program_id: Uuid,
        balance: i64,
    ) -> Result<Option<Reward>> {
        let rewards = self.list_active_rewards(program_id).await?;
        Ok(rewards
            .into_iter()
            .find(|r| r.has_stock() && r.tokens_required <= balance))
    }

    // ==================== 兑换 ====================

    /// 兑换奖励
    ///
    /// 余额不足、库存耗尽、奖励下架时整体回滚，余额与库存均不变
    #[instrument(skip(self))]
    pub async fn redeem(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        reward_id: Uuid,
    ) -> Result<RedemptionReceipt> {
        let program = self.ctx.active_program(program_id).await?;
        let cmd = RedeemCommand {
            program_id,
            customer_id,
            reward_id,
        };

        match self
            .ctx
            .repos
            .rewards
            .redeem(cmd, &self.ctx.ledger_context(&program))
            .await
        {
            Ok(receipt) => {
                metrics::record_redemption("created");
                info!(
                    redemption_id = %receipt.redemption.id,
                    code = %receipt.redemption.code,
                    tokens_used = receipt.redemption.tokens_used,
                    balance_after = receipt.balance_after,
                    "兑换成功"
                );
                Ok(receipt)
            }
            Err(e) => {
                metrics::record_redemption("rejected");
                warn!(error = %e, "兑换失败");
                Err(e)
            }
        }
    }

    /// 核销兑换记录
    #[instrument(skip(self))]
    pub async fn mark_used(&self, program_id: Uuid, redemption_id: Uuid) -> Result<Redemption> {
        let redemption = self
            .ctx
            .repos
            .rewards
            .mark_redemption_used(program_id, redemption_id, self.ctx.clock.now())
            .await?;
        self.ctx.record_interaction(redemption.customer_id).await;
        metrics::record_redemption("used");
        info!(code = %redemption.code, "兑换码已核销");
        Ok(redemption)
    }

    /// 按兑换码核销
    pub async fn mark_used_by_code(&self, program_id: Uuid, code: &str) -> Result<Redemption> {
        let redemption = self.get_redemption_by_code(program_id, code).await?;
        self.mark_used(program_id, redemption.id).await
    }

    pub async fn get_redemption_by_code(&self, program_id: Uuid, code: &str) -> Result<Redemption> {
        let code = code.trim().to_uppercase();
        self.ctx
            .repos
            .rewards
            .get_redemption_by_code(program_id, &code)
            .await?
            .ok_or_else(|| LoyaltyError::not_found("redemption", code))
    }

    /// 按创建时间倒序
    pub async fn list_customer_redemptions(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<Redemption>> {
        self.ctx
            .repos
            .rewards
            .list_customer_redemptions(program_id, customer_id)
            .await
    }

    /// 将过期未核销的记录转为 expired，不退还积分
    #[instrument(skip(self))]
    pub async fn expire_redemptions_sweep(&self, program_id: Uuid) -> Result<u64> {
        let expired = self
            .ctx
            .repos
            .rewards
            .expire_redemptions(program_id, self.ctx.clock.now())
            .await?;
        if expired > 0 {
            metrics::record_redemption("expired");
            info!(%program_id, expired, "过期兑换记录已处理");
        }
        Ok(expired)
    }
}
