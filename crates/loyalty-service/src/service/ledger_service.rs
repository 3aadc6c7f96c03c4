//! 积分账本服务
//!
//! 所有积分变动都经由这里追加流水。余额是流水的折叠结果，
//! 缓存投影只在记账单元内与流水一起更新。
//!
//! ## 入账类型
//!
//! - `credit` / `debit`：通用入账与扣减，金额必须为正
//! - `award_purchase`：消费返积分，同时累计消费金额
//! - `award_action`：按规则奖励行为，受周期上限约束
//! - `adjust_tokens`：人工调整，正负皆可

use loyalty_shared::observability::metrics;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::context::ServiceContext;
use super::dto::{ActionContext, ExpirySweepReport, LedgerEntryResult, TokenMovementRequest};
use super::rules_evaluator::RulesEvaluator;
use crate::error::{LoyaltyError, Result};
use crate::models::{
    ActionType, AppendGuard, Balance, LedgerTotals, LedgerTransaction, NewTransaction,
    ReconcileReport, ReferenceType, TransactionType,
};
use crate::repository::AppendOutcome;

/// 单次查询流水的上限
const MAX_HISTORY_LIMIT: i64 = 1_000;

pub struct LedgerService {
    ctx: ServiceContext,
    rules: RulesEvaluator,
}

impl LedgerService {
    pub fn new(ctx: ServiceContext) -> Self {
        let rules = RulesEvaluator::new(ctx.clone());
        Self { ctx, rules }
    }

    pub fn rules(&self) -> &RulesEvaluator {
        &self.rules
    }

    /// 入账
    #[instrument(skip(self, request), fields(program_id = %request.program_id, customer_id = %request.customer_id, amount = request.amount))]
    pub async fn credit(&self, request: TokenMovementRequest) -> Result<LedgerEntryResult> {
        if request.amount <= 0 {
            return Err(LoyaltyError::validation("入账积分必须大于 0"));
        }
        if matches!(
            request.transaction_type,
            TransactionType::Spend | TransactionType::Expiration
        ) {
            return Err(LoyaltyError::validation(format!(
                "{} 不能用于入账",
                request.transaction_type.as_str()
            )));
        }

        let new = movement(&request, request.amount);
        self.append(new, AppendGuard::None).await
    }

    /// 扣减，余额不足时整体拒绝
    #[instrument(skip(self, request), fields(program_id = %request.program_id, customer_id = %request.customer_id, amount = request.amount))]
    pub async fn debit(&self, request: TokenMovementRequest) -> Result<LedgerEntryResult> {
        if request.amount <= 0 {
            return Err(LoyaltyError::validation("扣减积分必须大于 0"));
        }
        if request.transaction_type.is_earn()
            || request.transaction_type == TransactionType::Expiration
        {
            return Err(LoyaltyError::validation(format!(
                "{} 不能用于扣减",
                request.transaction_type.as_str()
            )));
        }

        let new = movement(&request, -request.amount);
        self.append(new, AppendGuard::RequireBalance).await
    }

    /// 人工调整，正数入账，负数扣减（需余额充足）
    #[instrument(skip(self, reason))]
    pub async fn adjust_tokens(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        delta: i64,
        reason: &str,
    ) -> Result<LedgerEntryResult> {
        if delta == 0 {
            return Err(LoyaltyError::validation("调整数量不能为 0"));
        }
        if reason.trim().is_empty() {
            return Err(LoyaltyError::validation("调整原因不能为空"));
        }

        let new = NewTransaction::new(
            program_id,
            customer_id,
            delta,
            TransactionType::Adjustment,
            reason,
        );
        let guard = if delta < 0 {
            AppendGuard::RequireBalance
        } else {
            AppendGuard::None
        };
        self.append(new, guard).await
    }

    /// 消费返积分
    ///
    /// 无论返多少积分（包括 0）都追加一条 earn_purchase，金额计入 lifetime_value
    #[instrument(skip(self))]
    pub async fn award_purchase(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        amount: Decimal,
        purchase_id: Option<Uuid>,
    ) -> Result<LedgerEntryResult> {
        if amount <= Decimal::ZERO {
            return Err(LoyaltyError::validation("消费金额必须大于 0"));
        }

        let program = self.ctx.active_program(program_id).await?;
        let multiplier = self
            .ctx
            .membership_multiplier(program_id, customer_id)
            .await?;
        let tokens = program.purchase_tokens(amount, multiplier);

        let mut new = NewTransaction::new(
            program_id,
            customer_id,
            tokens,
            TransactionType::EarnPurchase,
            format!("Purchase of {}", amount),
        )
        .with_monetary_amount(amount);
        if let Some(id) = purchase_id {
            new = new.with_reference(ReferenceType::Purchase, id);
        }

        let outcome = self
            .ctx
            .repos
            .ledger
            .append(new, AppendGuard::None, &self.ctx.ledger_context(&program))
            .await?;
        Ok(self.finish(outcome))
    }

    /// 按规则奖励行为
    ///
    /// 没有启用规则或被周期上限截断为 0 时不追加流水
    #[instrument(skip(self, context))]
    pub async fn award_action(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        action_type: ActionType,
        context: ActionContext,
    ) -> Result<LedgerEntryResult> {
        let program = self.ctx.active_program(program_id).await?;
        let planned = self.rules.plan(program_id, customer_id, action_type).await?;

        let Some(planned) = planned.filter(|p| p.evaluation.tokens_awarded > 0) else {
            info!(%program_id, %customer_id, ?action_type, "本次行为不产生积分");
            let balance = self.get_balance(program_id, customer_id).await?;
            return Ok(LedgerEntryResult {
                tokens: 0,
                transaction: None,
                expired: 0,
                balance,
            });
        };

        let description = context
            .description
            .unwrap_or_else(|| format!("Reward for {:?}", action_type));
        let new = NewTransaction::new(
            program_id,
            customer_id,
            planned.evaluation.base_award,
            TransactionType::EarnAction,
            description,
        )
        .with_reference(ReferenceType::Rule, planned.rule.id)
        .with_action_type(action_type);

        let outcome = self
            .ctx
            .repos
            .ledger
            .append(new, planned.guard, &self.ctx.ledger_context(&program))
            .await?;
        Ok(self.finish(outcome))
    }

    /// 查询余额
    ///
    /// 缓存投影中最早一批积分已到期时，先补记过期再返回
    #[instrument(skip(self))]
    pub async fn get_balance(&self, program_id: Uuid, customer_id: Uuid) -> Result<Balance> {
        let program = self.ctx.active_program(program_id).await?;
        let ledger_ctx = self.ctx.ledger_context(&program);

        match self.ctx.repos.ledger.get_balance(program_id, customer_id).await? {
            Some(cached) if cached.next_expiry_at.is_some_and(|t| t < ledger_ctx.now) => {
                let outcome = self
                    .ctx
                    .repos
                    .ledger
                    .apply_expiry(program_id, customer_id, &ledger_ctx)
                    .await?;
                if outcome.expired > 0 {
                    metrics::record_ledger_transaction(TransactionType::Expiration.as_str());
                    info!(%program_id, %customer_id, expired = outcome.expired, "读取余额时补记过期积分");
                }
                Ok(outcome.balance)
            }
            Some(cached) => Ok(cached),
            None => {
                let totals = LedgerTotals::default();
                Ok(Balance::from_totals(
                    program_id,
                    customer_id,
                    &totals,
                    self.ctx.tiers.classify_totals(&totals),
                    ledger_ctx.now,
                ))
            }
        }
    }

    /// 按时间倒序列出流水
    pub async fn list_transactions(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        limit: i64,
    ) -> Result<Vec<LedgerTransaction>> {
        if limit <= 0 {
            return Err(LoyaltyError::validation("limit 必须大于 0"));
        }
        self.ctx
            .repos
            .ledger
            .list_transactions(program_id, customer_id, limit.min(MAX_HISTORY_LIMIT))
            .await
    }

    /// 用流水重放校正缓存投影
    #[instrument(skip(self))]
    pub async fn reconcile(&self, program_id: Uuid, customer_id: Uuid) -> Result<ReconcileReport> {
        let program = self.ctx.active_program(program_id).await?;
        let report = self
            .ctx
            .repos
            .ledger
            .reconcile(program_id, customer_id, &self.ctx.ledger_context(&program))
            .await?;
        if report.drifted {
            warn!(%program_id, %customer_id, "余额投影与流水不一致，已按重放结果改写");
        }
        Ok(report)
    }

    /// 扫描并补记计划内所有到期积分
    ///
    /// 与读取余额时的惰性过期走同一记账单元，重复执行不会重复过期
    #[instrument(skip(self))]
    pub async fn expire_tokens_sweep(&self, program_id: Uuid) -> Result<ExpirySweepReport> {
        let program = self.ctx.active_program(program_id).await?;
        let mut report = ExpirySweepReport::default();
        if program.tokens_expiry_days <= 0 {
            return Ok(report);
        }

        let now = self.ctx.ledger_context(&program).now;
        let due = self
            .ctx
            .repos
            .ledger
            .list_customers_due_expiry(program_id, now)
            .await?;

        for customer_id in due {
            let ledger_ctx = self.ctx.ledger_context(&program);
            match self
                .ctx
                .repos
                .ledger
                .apply_expiry(program_id, customer_id, &ledger_ctx)
                .await
            {
                Ok(outcome) => {
                    report.customers += 1;
                    if outcome.expired > 0 {
                        metrics::record_ledger_transaction(TransactionType::Expiration.as_str());
                        report.tokens_expired += outcome.expired;
                    }
                }
                Err(e) => {
                    warn!(%program_id, %customer_id, error = %e, "补记过期积分失败");
                    report.errors += 1;
                }
            }
        }

        info!(
            %program_id,
            customers = report.customers,
            tokens_expired = report.tokens_expired,
            errors = report.errors,
            "积分过期扫描完成"
        );
        Ok(report)
    }

    async fn append(&self, new: NewTransaction, guard: AppendGuard) -> Result<LedgerEntryResult> {
        let program = self.ctx.active_program(new.program_id).await?;
        let outcome = self
            .ctx
            .repos
            .ledger
            .append(new, guard, &self.ctx.ledger_context(&program))
            .await?;
        Ok(self.finish(outcome))
    }

    fn finish(&self, outcome: AppendOutcome) -> LedgerEntryResult {
        if outcome.expired > 0 {
            metrics::record_ledger_transaction(TransactionType::Expiration.as_str());
        }
        if let Some(tx) = &outcome.transaction {
            metrics::record_ledger_transaction(tx.transaction_type.as_str());
            info!(
                program_id = %tx.program_id,
                customer_id = %tx.customer_id,
                transaction_type = tx.transaction_type.as_str(),
                amount = tx.amount,
                balance = outcome.balance.current_balance,
                "积分流水已追加"
            );
        }

        LedgerEntryResult {
            tokens: outcome.transaction.as_ref().map_or(0, |tx| tx.amount),
            transaction: outcome.transaction,
            expired: outcome.expired,
            balance: outcome.balance,
        }
    }
}

fn movement(request: &TokenMovementRequest, signed_amount: i64) -> NewTransaction {
    let new = NewTransaction::new(
        request.program_id,
        request.customer_id,
        signed_amount,
        request.transaction_type,
        request.description.clone(),
    );
    match request.reference() {
        Some((reference_type, reference_id)) => new.with_reference(reference_type, reference_id),
        None => new,
    }
}
