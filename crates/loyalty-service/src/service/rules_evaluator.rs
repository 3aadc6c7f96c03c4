//! 积分规则评估
//!
//! 行为 -> 生效规则 -> base × multiplier × 会员倍率 -> 周期上限截断。
//! 这里的截断结果用于预览；真正入账时上限在记账单元内再次执行。

use loyalty_shared::clock::Clock;
use tracing::debug;
use uuid::Uuid;

use super::context::ServiceContext;
use super::dto::RuleEvaluation;
use crate::error::Result;
use crate::models::{ActionType, AppendGuard, TokenRule, clamp_to_cap, select_rule};

/// 规则评估器
#[derive(Clone)]
pub struct RulesEvaluator {
    ctx: ServiceContext,
}

/// 评估出的奖励以及入账时使用的 guard
#[derive(Debug, Clone)]
pub struct PlannedAward {
    pub rule: TokenRule,
    pub evaluation: RuleEvaluation,
    pub guard: AppendGuard,
}

impl RulesEvaluator {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// 找出某行为的生效规则，没有则返回 None
    pub async fn active_rule(
        &self,
        program_id: Uuid,
        action_type: ActionType,
    ) -> Result<Option<TokenRule>> {
        let rules = self
            .ctx
            .repos
            .programs
            .list_rules(program_id, action_type)
            .await?;
        Ok(select_rule(&rules, action_type).cloned())
    }

    /// 计算本次行为可得积分
    ///
    /// 没有启用规则时返回 None
    pub async fn plan(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        action_type: ActionType,
    ) -> Result<Option<PlannedAward>> {
        let Some(rule) = self.active_rule(program_id, action_type).await? else {
            debug!(%program_id, ?action_type, "没有启用的积分规则");
            return Ok(None);
        };

        let multiplier = self
            .ctx
            .membership_multiplier(program_id, customer_id)
            .await?;
        let base_award = rule.award(multiplier);
        let now = self.ctx.clock.now();

        let (tokens_awarded, cap, window_start, guard) = match rule.cap_window(now) {
            Some((cap, since)) => {
                let earned = self
                    .ctx
                    .repos
                    .ledger
                    .earned_for_action_since(program_id, customer_id, action_type, since)
                    .await?;
                let guard = AppendGuard::PeriodCap {
                    action_type,
                    since,
                    cap,
                };
                (clamp_to_cap(base_award, earned, cap), Some(cap), since, guard)
            }
            None => (base_award, None, None, AppendGuard::None),
        };

        Ok(Some(PlannedAward {
            evaluation: RuleEvaluation {
                rule_id: rule.id,
                action_type,
                base_award,
                tokens_awarded,
                cap,
                window_start,
            },
            rule,
            guard,
        }))
    }

    /// 只返回可得积分数，无规则时为 0
    pub async fn evaluate(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        action_type: ActionType,
    ) -> Result<i64> {
        Ok(self
            .plan(program_id, customer_id, action_type)
            .await?
            .map_or(0, |p| p.evaluation.tokens_awarded))
    }
}
