//! 对外类型化接口
//!
//! 传输层（HTTP、gRPC 等）只与这里交互。每个操作都返回 [`ApiResponse`]，
//! 业务失败以错误分类表达，不向调用方抛出错误。

use std::sync::Arc;

use loyalty_shared::clock::SharedClock;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use super::context::ServiceContext;
use super::dto::{ApiResponse, LedgerEntryResult, LoyaltyStats, StatsPeriod, TokenMovementRequest};
use super::ledger_service::LedgerService;
use super::membership_service::MembershipService;
use super::program_service::ProgramService;
use super::redemption_service::RedemptionService;
use super::stats_service::StatsService;
use crate::error::Result;
use crate::models::{Balance, Membership, NewMembership, Redemption, RedemptionReceipt};
use crate::repository::{MemoryStore, Repositories};
use crate::tier::TierClassifier;

/// 积分服务门面
#[derive(Clone)]
pub struct LoyaltyApi {
    ctx: ServiceContext,
    programs: Arc<ProgramService>,
    ledger: Arc<LedgerService>,
    redemptions: Arc<RedemptionService>,
    memberships: Arc<MembershipService>,
    stats: Arc<StatsService>,
}

impl LoyaltyApi {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            programs: Arc::new(ProgramService::new(ctx.clone())),
            ledger: Arc::new(LedgerService::new(ctx.clone())),
            redemptions: Arc::new(RedemptionService::new(ctx.clone())),
            memberships: Arc::new(MembershipService::new(ctx.clone())),
            stats: Arc::new(StatsService::new(ctx.clone())),
            ctx,
        }
    }

    /// Postgres 仓储
    pub fn postgres(pool: PgPool, clock: SharedClock, tiers: TierClassifier) -> Self {
        Self::new(ServiceContext::new(
            Repositories::postgres(pool),
            clock,
            tiers,
        ))
    }

    /// 内存仓储，用于测试与本地演示
    pub fn in_memory(store: Arc<MemoryStore>, clock: SharedClock, tiers: TierClassifier) -> Self {
        Self::new(ServiceContext::new(
            Repositories::memory(store),
            clock,
            tiers,
        ))
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    pub fn programs(&self) -> &ProgramService {
        &self.programs
    }

    pub fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    pub fn redemptions(&self) -> &RedemptionService {
        &self.redemptions
    }

    pub fn memberships(&self) -> &MembershipService {
        &self.memberships
    }

    pub fn stats(&self) -> &StatsService {
        &self.stats
    }

    // ==================== 类型化操作 ====================

    pub async fn credit_tokens(&self, request: TokenMovementRequest) -> ApiResponse<LedgerEntryResult> {
        respond("credit_tokens", self.ledger.credit(request).await)
    }

    pub async fn debit_tokens(&self, request: TokenMovementRequest) -> ApiResponse<LedgerEntryResult> {
        respond("debit_tokens", self.ledger.debit(request).await)
    }

    pub async fn award_purchase(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        amount: Decimal,
        purchase_id: Option<Uuid>,
    ) -> ApiResponse<LedgerEntryResult> {
        respond(
            "award_purchase",
            self.ledger
                .award_purchase(program_id, customer_id, amount, purchase_id)
                .await,
        )
    }

    pub async fn redeem_reward(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        reward_id: Uuid,
    ) -> ApiResponse<RedemptionReceipt> {
        respond(
            "redeem_reward",
            self.redemptions
                .redeem(program_id, customer_id, reward_id)
                .await,
        )
    }

    pub async fn mark_redemption_used(
        &self,
        program_id: Uuid,
        redemption_id: Uuid,
    ) -> ApiResponse<Redemption> {
        respond(
            "mark_redemption_used",
            self.redemptions.mark_used(program_id, redemption_id).await,
        )
    }

    pub async fn create_membership(&self, request: NewMembership) -> ApiResponse<Membership> {
        respond(
            "create_membership",
            self.memberships.create_membership(request).await,
        )
    }

    pub async fn cancel_membership(&self, membership_id: Uuid) -> ApiResponse<Membership> {
        respond(
            "cancel_membership",
            self.memberships.cancel_membership(membership_id).await,
        )
    }

    pub async fn get_balance(&self, program_id: Uuid, customer_id: Uuid) -> ApiResponse<Balance> {
        respond(
            "get_balance",
            self.ledger.get_balance(program_id, customer_id).await,
        )
    }

    pub async fn get_stats(&self, program_id: Uuid, period: StatsPeriod) -> ApiResponse<LoyaltyStats> {
        respond("get_stats", self.stats.get_stats(program_id, period).await)
    }
}

/// 系统错误在边界处记录一次，业务错误由各服务自行记录
fn respond<T>(operation: &'static str, result: Result<T>) -> ApiResponse<T> {
    if let Err(e) = &result {
        if !e.is_business_error() {
            warn!(operation, error = %e, code = e.error_code(), "接口调用失败");
        }
    }
    result.into()
}
