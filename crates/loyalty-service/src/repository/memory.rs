//! 内存仓储
//!
//! 用于测试与 `--memory` 模式的本地演练。所有数据放在一把互斥锁后面，
//! 每个仓储方法在持锁期间完成，等价于 Postgres 实现中的一个事务。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::ledger_unit::{earned_for_action, plan_write};
use super::traits::{
    AppendOutcome, CustomerRepositoryTrait, ExpiringMembership, LedgerContext,
    LedgerRepositoryTrait, LedgerStats, MembershipRepositoryTrait, NotificationLogRepositoryTrait,
    ProgramRepositoryTrait, RedeemCommand, RewardRepositoryTrait,
};
use crate::error::{LoyaltyError, Result};
use crate::models::{
    ActionType, AppendGuard, Balance, Customer, LedgerTransaction, Membership, MembershipPlan,
    MembershipStatus, MessageType, NewTransaction, NotificationLogEntry, Program,
    ReconcileReport, Redemption, RedemptionReceipt, RedemptionStatus, ReferenceType, Reward,
    TokenRule, TransactionType, generate_redemption_code, replay,
};

const MAX_CODE_ATTEMPTS: usize = 5;

type CustomerKey = (Uuid, Uuid);

#[derive(Default)]
struct MemoryState {
    programs: HashMap<Uuid, Program>,
    rules: Vec<TokenRule>,
    customers: HashMap<Uuid, Customer>,
    transactions: HashMap<CustomerKey, Vec<LedgerTransaction>>,
    balances: HashMap<CustomerKey, Balance>,
    rewards: HashMap<Uuid, Reward>,
    redemptions: HashMap<Uuid, Redemption>,
    plans: HashMap<Uuid, MembershipPlan>,
    memberships: HashMap<Uuid, Membership>,
    notifications: Vec<NotificationLogEntry>,
}

impl MemoryState {
    fn history(&self, key: CustomerKey) -> &[LedgerTransaction] {
        self.transactions.get(&key).map_or(&[], Vec::as_slice)
    }

    fn touch(&mut self, customer_id: Uuid, at: DateTime<Utc>) {
        if let Some(customer) = self.customers.get_mut(&customer_id) {
            customer.last_interaction_at = customer.last_interaction_at.max(Some(at));
        }
    }

    /// 与 Postgres 的 append_in_tx 相同的记账单元，失败时不修改任何状态
    fn append(
        &mut self,
        program_id: Uuid,
        customer_id: Uuid,
        new: Option<NewTransaction>,
        guard: AppendGuard,
        ctx: &LedgerContext,
    ) -> Result<AppendOutcome> {
        let key = (program_id, customer_id);
        let write = plan_write(program_id, customer_id, self.history(key), new, guard, ctx)?;

        self.transactions
            .entry(key)
            .or_default()
            .extend(write.new_transactions().cloned());
        self.balances.insert(key, write.balance.clone());
        if write.appended.is_some() {
            self.touch(customer_id, ctx.now);
        }

        Ok(AppendOutcome {
            expired: write.expired(),
            transaction: write.appended,
            balance: write.balance,
        })
    }

    fn unique_code(&self) -> Result<String> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_redemption_code();
            if !self.redemptions.values().any(|r| r.code == code) {
                return Ok(code);
            }
        }
        Err(LoyaltyError::Internal("无法生成唯一兑换码".to_string()))
    }
}

/// 内存实现，同时实现全部仓储接口
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接覆盖缓存投影，不经过记账单元（数据修复演练与测试使用）
    pub fn put_balance(&self, balance: Balance) {
        self.state
            .lock()
            .balances
            .insert((balance.program_id, balance.customer_id), balance);
    }

    pub fn transaction_count(&self, program_id: Uuid, customer_id: Uuid) -> usize {
        self.state.lock().history((program_id, customer_id)).len()
    }
}

#[async_trait]
impl ProgramRepositoryTrait for MemoryStore {
    async fn create_program(&self, program: &Program) -> Result<()> {
        let mut state = self.state.lock();
        let conflict = program.is_active
            && state
                .programs
                .values()
                .any(|p| p.tenant_id == program.tenant_id && p.is_active);
        if conflict {
            return Err(LoyaltyError::validation(format!(
                "租户 {} 已存在启用中的积分计划",
                program.tenant_id
            )));
        }
        state.programs.insert(program.id, program.clone());
        Ok(())
    }

    async fn get_program(&self, id: Uuid) -> Result<Option<Program>> {
        Ok(self.state.lock().programs.get(&id).cloned())
    }

    async fn get_active_program(&self, tenant_id: Uuid) -> Result<Option<Program>> {
        Ok(self
            .state
            .lock()
            .programs
            .values()
            .find(|p| p.tenant_id == tenant_id && p.is_active)
            .cloned())
    }

    async fn list_active_programs(&self) -> Result<Vec<Program>> {
        let mut programs: Vec<_> = self
            .state
            .lock()
            .programs
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        programs.sort_by_key(|p| p.created_at);
        Ok(programs)
    }

    async fn upsert_rule(&self, rule: &TokenRule) -> Result<()> {
        let mut state = self.state.lock();
        match state.rules.iter_mut().find(|r| r.id == rule.id) {
            // 覆盖时保留首次创建时间，与 Postgres 的 ON CONFLICT 一致
            Some(existing) => {
                *existing = TokenRule {
                    created_at: existing.created_at,
                    ..rule.clone()
                }
            }
            None => state.rules.push(rule.clone()),
        }
        Ok(())
    }

    async fn list_rules(
        &self,
        program_id: Uuid,
        action_type: ActionType,
    ) -> Result<Vec<TokenRule>> {
        let mut rules: Vec<_> = self
            .state
            .lock()
            .rules
            .iter()
            .filter(|r| r.program_id == program_id && r.action_type == action_type)
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rules)
    }
}

#[async_trait]
impl CustomerRepositoryTrait for MemoryStore {
    async fn upsert_customer(&self, customer: &Customer) -> Result<()> {
        let mut state = self.state.lock();
        match state.customers.get_mut(&customer.id) {
            Some(existing) => {
                existing.name = customer.name.clone();
                existing.phone = customer.phone.clone();
                existing.last_interaction_at =
                    existing.last_interaction_at.max(customer.last_interaction_at);
            }
            None => {
                state.customers.insert(customer.id, customer.clone());
            }
        }
        Ok(())
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>> {
        Ok(self.state.lock().customers.get(&id).cloned())
    }

    async fn touch_customer(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.state.lock().touch(id, at);
        Ok(())
    }

    async fn list_inactive_customers(
        &self,
        tenant_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Customer>> {
        let mut customers: Vec<_> = self
            .state
            .lock()
            .customers
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.last_seen_at() < cutoff)
            .cloned()
            .collect();
        customers.sort_by_key(|c| c.last_seen_at());
        Ok(customers)
    }
}

#[async_trait]
impl LedgerRepositoryTrait for MemoryStore {
    async fn append(
        &self,
        tx: NewTransaction,
        guard: AppendGuard,
        ctx: &LedgerContext,
    ) -> Result<AppendOutcome> {
        let (program_id, customer_id) = (tx.program_id, tx.customer_id);
        self.state
            .lock()
            .append(program_id, customer_id, Some(tx), guard, ctx)
    }

    async fn apply_expiry(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        ctx: &LedgerContext,
    ) -> Result<AppendOutcome> {
        self.state
            .lock()
            .append(program_id, customer_id, None, AppendGuard::None, ctx)
    }

    async fn get_balance(&self, program_id: Uuid, customer_id: Uuid) -> Result<Option<Balance>> {
        Ok(self
            .state
            .lock()
            .balances
            .get(&(program_id, customer_id))
            .cloned())
    }

    async fn list_transactions(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        limit: i64,
    ) -> Result<Vec<LedgerTransaction>> {
        let state = self.state.lock();
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state
            .history((program_id, customer_id))
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn reconcile(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        ctx: &LedgerContext,
    ) -> Result<ReconcileReport> {
        let mut state = self.state.lock();
        let key = (program_id, customer_id);
        let cached = state.balances.get(&key).cloned();
        let history = state.history(key);

        let totals = replay(history, ctx.expiry_days);
        let replayed = Balance::from_totals(
            program_id,
            customer_id,
            &totals,
            ctx.tiers.classify_totals(&totals),
            ctx.now,
        );
        let drifted = match &cached {
            Some(c) => !c.same_figures(&replayed),
            None => !history.is_empty(),
        };

        state.balances.insert(key, replayed.clone());
        Ok(ReconcileReport {
            drifted,
            cached,
            replayed,
        })
    }

    async fn earned_for_action_since(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        action_type: ActionType,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let state = self.state.lock();
        Ok(earned_for_action(
            state.history((program_id, customer_id)),
            action_type,
            since,
        ))
    }

    async fn list_customers_due_expiry(
        &self,
        program_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let state = self.state.lock();
        let mut due: Vec<_> = state
            .balances
            .values()
            .filter(|b| b.program_id == program_id)
            .filter_map(|b| b.next_expiry_at.filter(|t| *t <= at).map(|t| (t, b.customer_id)))
            .collect();
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn ledger_stats(
        &self,
        program_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<LedgerStats> {
        let state = self.state.lock();
        let mut stats = LedgerStats::default();
        for ((pid, _), txs) in &state.transactions {
            if *pid != program_id {
                continue;
            }
            let mut active = false;
            for tx in txs.iter().filter(|t| since.is_none_or(|s| t.created_at >= s)) {
                match tx.transaction_type {
                    TransactionType::Expiration => stats.tokens_expired += -tx.amount,
                    _ if tx.amount > 0 => stats.tokens_issued += tx.amount,
                    _ => stats.tokens_spent += -tx.amount,
                }
                if tx.transaction_type != TransactionType::Expiration {
                    active = true;
                }
            }
            if active {
                stats.active_customers += 1;
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl RewardRepositoryTrait for MemoryStore {
    async fn create_reward(&self, reward: &Reward) -> Result<()> {
        self.state.lock().rewards.insert(reward.id, reward.clone());
        Ok(())
    }

    async fn get_reward(&self, id: Uuid) -> Result<Option<Reward>> {
        Ok(self.state.lock().rewards.get(&id).cloned())
    }

    async fn set_reward_active(
        &self,
        id: Uuid,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        Ok(match state.rewards.get_mut(&id) {
            Some(reward) => {
                reward.is_active = active;
                reward.updated_at = now;
                true
            }
            None => false,
        })
    }

    async fn list_active_rewards(&self, program_id: Uuid) -> Result<Vec<Reward>> {
        let mut rewards: Vec<_> = self
            .state
            .lock()
            .rewards
            .values()
            .filter(|r| r.program_id == program_id && r.is_active)
            .cloned()
            .collect();
        rewards.sort_by_key(|r| (r.tokens_required, r.created_at));
        Ok(rewards)
    }

    async fn redeem(&self, cmd: RedeemCommand, ctx: &LedgerContext) -> Result<RedemptionReceipt> {
        let mut state = self.state.lock();

        let reward = state
            .rewards
            .get(&cmd.reward_id)
            .filter(|r| r.program_id == cmd.program_id)
            .cloned()
            .ok_or_else(|| LoyaltyError::not_found("reward", cmd.reward_id))?;
        reward.check_available()?;

        // 先取兑换码，保证扣积分之后不会再失败
        let code = state.unique_code()?;
        let redemption_id = Uuid::now_v7();
        let spend = NewTransaction::new(
            cmd.program_id,
            cmd.customer_id,
            -reward.tokens_required,
            TransactionType::Spend,
            format!("Redeemed {}", reward.name),
        )
        .with_reference(ReferenceType::Redemption, redemption_id);
        let outcome = state.append(
            cmd.program_id,
            cmd.customer_id,
            Some(spend),
            AppendGuard::RequireBalance,
            ctx,
        )?;

        if let Some(r) = state.rewards.get_mut(&reward.id) {
            r.stock_used += 1;
            r.updated_at = ctx.now;
        }

        let redemption = Redemption {
            id: redemption_id,
            program_id: cmd.program_id,
            customer_id: cmd.customer_id,
            reward_id: reward.id,
            code,
            tokens_used: reward.tokens_required,
            status: RedemptionStatus::Pending,
            created_at: ctx.now,
            expires_at: reward.expires_at(ctx.now),
            used_at: None,
        };
        state.redemptions.insert(redemption.id, redemption.clone());

        Ok(RedemptionReceipt {
            redemption,
            balance_after: outcome.balance.current_balance,
        })
    }

    async fn get_redemption_by_code(
        &self,
        program_id: Uuid,
        code: &str,
    ) -> Result<Option<Redemption>> {
        Ok(self
            .state
            .lock()
            .redemptions
            .values()
            .find(|r| r.program_id == program_id && r.code == code)
            .cloned())
    }

    async fn list_customer_redemptions(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<Redemption>> {
        let mut redemptions: Vec<_> = self
            .state
            .lock()
            .redemptions
            .values()
            .filter(|r| r.program_id == program_id && r.customer_id == customer_id)
            .cloned()
            .collect();
        redemptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(redemptions)
    }

    async fn mark_redemption_used(
        &self,
        program_id: Uuid,
        redemption_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Redemption> {
        let mut state = self.state.lock();
        let redemption = state
            .redemptions
            .get_mut(&redemption_id)
            .filter(|r| r.program_id == program_id)
            .ok_or_else(|| LoyaltyError::not_found("redemption", redemption_id))?;

        if redemption.expire_if_due(now) {
            return Err(redemption.transition_error(RedemptionStatus::Used));
        }
        redemption.mark_used(now)?;
        Ok(redemption.clone())
    }

    async fn expire_redemptions(&self, program_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock();
        let expired = state
            .redemptions
            .values_mut()
            .filter(|r| r.program_id == program_id)
            .map(|r| r.expire_if_due(now))
            .filter(|changed| *changed)
            .count();
        Ok(expired as u64)
    }

    async fn redemption_stats(
        &self,
        program_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<(i64, i64)> {
        let state = self.state.lock();
        let in_window = |t: DateTime<Utc>| since.is_none_or(|s| t >= s);
        let mut created = 0;
        let mut used = 0;
        for r in state.redemptions.values().filter(|r| r.program_id == program_id) {
            if in_window(r.created_at) {
                created += 1;
            }
            if r.status == RedemptionStatus::Used && r.used_at.is_some_and(|t| in_window(t)) {
                used += 1;
            }
        }
        Ok((created, used))
    }
}

#[async_trait]
impl MembershipRepositoryTrait for MemoryStore {
    async fn create_plan(&self, plan: &MembershipPlan) -> Result<()> {
        self.state.lock().plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<MembershipPlan>> {
        Ok(self.state.lock().plans.get(&id).cloned())
    }

    async fn list_plans(&self, program_id: Uuid) -> Result<Vec<MembershipPlan>> {
        let mut plans: Vec<_> = self
            .state
            .lock()
            .plans
            .values()
            .filter(|p| p.program_id == program_id)
            .cloned()
            .collect();
        plans.sort_by_key(|p| p.created_at);
        Ok(plans)
    }

    async fn create_membership(&self, membership: &Membership) -> Result<()> {
        self.state
            .lock()
            .memberships
            .insert(membership.id, membership.clone());
        Ok(())
    }

    async fn get_membership(&self, id: Uuid) -> Result<Option<Membership>> {
        Ok(self.state.lock().memberships.get(&id).cloned())
    }

    async fn update_membership(
        &self,
        membership: &Membership,
        expected: MembershipStatus,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        match state.memberships.get_mut(&membership.id) {
            Some(stored) if stored.status == expected => {
                *stored = membership.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active_ending_on(
        &self,
        program_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<ExpiringMembership>> {
        let state = self.state.lock();
        let mut rows: Vec<_> = state
            .memberships
            .values()
            .filter(|m| {
                m.program_id == program_id
                    && m.status == MembershipStatus::Active
                    && m.end_date == date
            })
            .filter_map(|m| {
                let customer = state.customers.get(&m.customer_id)?;
                let plan = state.plans.get(&m.plan_id)?;
                Some(ExpiringMembership {
                    membership: m.clone(),
                    customer_name: customer.name.clone(),
                    plan_name: plan.name.clone(),
                })
            })
            .collect();
        rows.sort_by_key(|row| row.membership.created_at);
        Ok(rows)
    }

    async fn list_due_for_sweep(
        &self,
        program_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<Membership>> {
        let mut due: Vec<_> = self
            .state
            .lock()
            .memberships
            .values()
            .filter(|m| {
                m.program_id == program_id
                    && m.status == MembershipStatus::Active
                    && m.is_past_end(today)
            })
            .cloned()
            .collect();
        due.sort_by_key(|m| m.end_date);
        Ok(due)
    }

    async fn active_multiplier(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        today: NaiveDate,
    ) -> Result<Option<Decimal>> {
        let state = self.state.lock();
        Ok(state
            .memberships
            .values()
            .filter(|m| {
                m.program_id == program_id
                    && m.customer_id == customer_id
                    && m.status == MembershipStatus::Active
                    && m.end_date >= today
            })
            .filter_map(|m| state.plans.get(&m.plan_id))
            .map(|p| p.tokens_multiplier)
            .max())
    }

    async fn get_active_membership(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        today: NaiveDate,
    ) -> Result<Option<Membership>> {
        Ok(self
            .state
            .lock()
            .memberships
            .values()
            .filter(|m| {
                m.program_id == program_id
                    && m.customer_id == customer_id
                    && m.status == MembershipStatus::Active
                    && m.end_date >= today
            })
            .max_by_key(|m| m.end_date)
            .cloned())
    }

    async fn membership_stats(
        &self,
        program_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<(i64, i64)> {
        let state = self.state.lock();
        let mut created = 0;
        let mut active = 0;
        for m in state.memberships.values().filter(|m| m.program_id == program_id) {
            if since.is_none_or(|s| m.created_at >= s) {
                created += 1;
            }
            if m.status == MembershipStatus::Active {
                active += 1;
            }
        }
        Ok((created, active))
    }
}

#[async_trait]
impl NotificationLogRepositoryTrait for MemoryStore {
    async fn exists(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        message_type: MessageType,
        since: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        Ok(self.state.lock().notifications.iter().any(|e| {
            e.program_id == program_id
                && e.customer_id == customer_id
                && e.message_type == message_type
                && since.is_none_or(|s| e.sent_at >= s)
        }))
    }

    async fn try_record(
        &self,
        entry: &NotificationLogEntry,
        lookback_since: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let blocked = state.notifications.iter().any(|e| {
            e.program_id == entry.program_id
                && e.customer_id == entry.customer_id
                && e.message_type == entry.message_type
                && (e.dedup_key == entry.dedup_key
                    || lookback_since.is_none_or(|s| e.sent_at >= s))
        });
        if blocked {
            return Ok(false);
        }
        state.notifications.push(entry.clone());
        Ok(true)
    }

    async fn list_for_customer(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<NotificationLogEntry>> {
        let mut entries: Vec<_> = self
            .state
            .lock()
            .notifications
            .iter()
            .filter(|e| e.program_id == program_id && e.customer_id == customer_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(entries)
    }
}
