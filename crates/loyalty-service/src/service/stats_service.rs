//! 运营统计

use loyalty_shared::clock::Clock;
use tracing::instrument;
use uuid::Uuid;

use super::context::ServiceContext;
use super::dto::{LoyaltyStats, StatsPeriod};
use crate::error::Result;

pub struct StatsService {
    ctx: ServiceContext,
}

impl StatsService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// 窗口内的积分发放/消耗/过期、兑换、会员与活跃客户数
    ///
    /// 当前 active 会员数不受窗口限制
    #[instrument(skip(self))]
    pub async fn get_stats(&self, program_id: Uuid, period: StatsPeriod) -> Result<LoyaltyStats> {
        self.ctx.active_program(program_id).await?;
        let since = period.since(self.ctx.clock.now());

        let ledger = self.ctx.repos.ledger.ledger_stats(program_id, since).await?;
        let (redemptions_created, redemptions_used) = self
            .ctx
            .repos
            .rewards
            .redemption_stats(program_id, since)
            .await?;
        let (memberships_created, active_memberships) = self
            .ctx
            .repos
            .memberships
            .membership_stats(program_id, since)
            .await?;

        Ok(LoyaltyStats {
            period,
            since,
            tokens_issued: ledger.tokens_issued,
            tokens_spent: ledger.tokens_spent,
            tokens_expired: ledger.tokens_expired,
            redemptions_created,
            redemptions_used,
            memberships_created,
            active_memberships,
            active_customers: ledger.active_customers,
        })
    }
}
