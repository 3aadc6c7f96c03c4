//! 会员生命周期服务
//!
//! 状态机：pending -> active -> {expired | cancelled}，终态不可恢复，
//! 重新订阅会新建一条会员记录。所有状态写入都是乐观更新，
//! 库中状态已被并发修改时返回 `ConcurrencyConflict`。

use loyalty_shared::clock::Clock;
use loyalty_shared::observability::metrics;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::context::ServiceContext;
use crate::error::{LoyaltyError, Result};
use crate::models::{
    Membership, MembershipPlan, MembershipStatus, MembershipSweepReport, NewMembership,
    NewMembershipPlan,
};

/// 单条会员在一次扫描中最多补续的周期数
const MAX_RENEWALS_PER_SWEEP: usize = 24;

pub struct MembershipService {
    ctx: ServiceContext,
}

impl MembershipService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    // ==================== 会员计划 ====================

    #[instrument(skip(self, request), fields(program_id = %request.program_id, name = %request.name))]
    pub async fn create_plan(&self, request: NewMembershipPlan) -> Result<MembershipPlan> {
        request.validate()?;
        self.ctx.active_program(request.program_id).await?;

        let plan = request.into_plan(Uuid::now_v7(), self.ctx.clock.now());
        self.ctx.repos.memberships.create_plan(&plan).await?;
        info!(plan_id = %plan.id, "会员计划已创建");
        Ok(plan)
    }

    pub async fn list_plans(&self, program_id: Uuid) -> Result<Vec<MembershipPlan>> {
        self.ctx.repos.memberships.list_plans(program_id).await
    }

    // ==================== 会员 ====================

    /// 开通会员
    ///
    /// 支付为异步流程时创建 pending，否则直接 active
    #[instrument(skip(self, request), fields(program_id = %request.program_id, customer_id = %request.customer_id))]
    pub async fn create_membership(&self, request: NewMembership) -> Result<Membership> {
        self.ctx.active_program(request.program_id).await?;
        let plan = self
            .ctx
            .repos
            .memberships
            .get_plan(request.plan_id)
            .await?
            .filter(|p| p.program_id == request.program_id && p.is_active)
            .ok_or_else(|| LoyaltyError::not_found("membership_plan", request.plan_id))?;

        let membership = request.into_membership(
            Uuid::now_v7(),
            &plan,
            self.ctx.clock.today(),
            self.ctx.clock.now(),
        )?;
        self.ctx
            .repos
            .memberships
            .create_membership(&membership)
            .await?;

        self.ctx.record_interaction(membership.customer_id).await;

        metrics::record_membership("created");
        info!(
            membership_id = %membership.id,
            status = membership.status.as_str(),
            end_date = %membership.end_date,
            "会员已开通"
        );
        Ok(membership)
    }

    pub async fn get_membership(&self, membership_id: Uuid) -> Result<Membership> {
        self.ctx
            .repos
            .memberships
            .get_membership(membership_id)
            .await?
            .ok_or_else(|| LoyaltyError::not_found("membership", membership_id))
    }

    /// 客户当前有效的会员（active 且未过结束日）
    pub async fn get_active_membership(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Option<Membership>> {
        self.ctx
            .repos
            .memberships
            .get_active_membership(program_id, customer_id, self.ctx.clock.today())
            .await
    }

    /// 当前生效的积分倍率，无会员时为 1
    pub async fn active_multiplier(&self, program_id: Uuid, customer_id: Uuid) -> Result<Decimal> {
        self.ctx
            .membership_multiplier(program_id, customer_id)
            .await
    }

    /// 首次支付完成：pending -> active，周期从今天起算
    #[instrument(skip(self))]
    pub async fn activate_membership(
        &self,
        membership_id: Uuid,
        payment_amount: Option<Decimal>,
    ) -> Result<Membership> {
        if payment_amount.is_some_and(|a| a < Decimal::ZERO) {
            return Err(LoyaltyError::validation("支付金额不能为负"));
        }
        let mut membership = self.get_membership(membership_id).await?;
        let expected = membership.status;
        membership.activate(self.ctx.clock.today(), payment_amount, self.ctx.clock.now())?;
        self.save(&membership, expected, "activated").await?;
        self.ctx.record_interaction(membership.customer_id).await;
        Ok(membership)
    }

    /// 立即取消，倍率从此刻起不再生效
    #[instrument(skip(self))]
    pub async fn cancel_membership(&self, membership_id: Uuid) -> Result<Membership> {
        let mut membership = self.get_membership(membership_id).await?;
        let expected = membership.status;
        membership.cancel(self.ctx.clock.now())?;
        self.save(&membership, expected, "cancelled").await?;
        Ok(membership)
    }

    /// 续期一个周期
    #[instrument(skip(self))]
    pub async fn renew_membership(&self, membership_id: Uuid) -> Result<Membership> {
        let mut membership = self.get_membership(membership_id).await?;
        membership.renew(self.ctx.clock.now())?;
        self.save(&membership, MembershipStatus::Active, "renewed")
            .await?;
        Ok(membership)
    }

    /// 到期扫描
    ///
    /// 结束日已过的 active 会员：auto_renew 的续到覆盖今天，其余转为 expired。
    /// 单条失败只记录日志，不影响其他会员。
    #[instrument(skip(self))]
    pub async fn membership_expiry_sweep(&self, program_id: Uuid) -> Result<MembershipSweepReport> {
        let today = self.ctx.clock.today();
        let due = self
            .ctx
            .repos
            .memberships
            .list_due_for_sweep(program_id, today)
            .await?;

        let mut report = MembershipSweepReport::default();
        for mut membership in due {
            let now = self.ctx.clock.now();
            let (result, action) = if membership.auto_renew {
                (renew_through(&mut membership, today, now), "renewed")
            } else {
                (membership.expire(now), "expired")
            };

            let saved = match result {
                Ok(()) => {
                    self.save(&membership, MembershipStatus::Active, action)
                        .await
                }
                Err(e) => Err(e),
            };
            match saved {
                Ok(()) if action == "renewed" => report.renewed += 1,
                Ok(()) => report.expired += 1,
                Err(e) => {
                    warn!(membership_id = %membership.id, error = %e, "会员到期处理失败");
                }
            }
        }

        info!(
            %program_id,
            renewed = report.renewed,
            expired = report.expired,
            "会员到期扫描完成"
        );
        Ok(report)
    }

    async fn save(
        &self,
        membership: &Membership,
        expected: MembershipStatus,
        action: &str,
    ) -> Result<()> {
        let written = self
            .ctx
            .repos
            .memberships
            .update_membership(membership, expected)
            .await?;
        if !written {
            return Err(LoyaltyError::ConcurrencyConflict);
        }
        metrics::record_membership(action);
        info!(
            membership_id = %membership.id,
            status = membership.status.as_str(),
            end_date = %membership.end_date,
            action,
            "会员状态已更新"
        );
        Ok(())
    }
}

/// 连续续期直到结束日覆盖 today
fn renew_through(
    membership: &mut Membership,
    today: chrono::NaiveDate,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    for _ in 0..MAX_RENEWALS_PER_SWEEP {
        if !membership.is_past_end(today) {
            break;
        }
        membership.renew(now)?;
    }
    Ok(())
}
