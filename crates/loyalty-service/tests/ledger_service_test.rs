//! LedgerService 集成测试
//!
//! 使用内存仓储与固定时钟覆盖账本的余额、规则与过期语义。

mod common;

use chrono::Duration;
use loyalty::dto::{ActionContext, UpsertRuleRequest};
use loyalty::{ActionType, ErrorKind, LoyaltyError, PeriodType, Tier, TransactionType};
use rust_decimal::Decimal;

use common::fixture;

// ==================== 余额 ====================

#[tokio::test]
async fn test_balance_is_sum_of_transactions() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Ana").await;

    fx.credit(customer, 100).await;
    fx.api
        .ledger()
        .debit(fx.spend(customer, 30))
        .await
        .unwrap();
    fx.api
        .ledger()
        .adjust_tokens(fx.program_id(), customer, -10, "goodwill correction")
        .await
        .unwrap();
    let purchase = fx
        .api
        .ledger()
        .award_purchase(fx.program_id(), customer, Decimal::new(5_075, 2), None)
        .await
        .unwrap();
    assert_eq!(purchase.tokens, 50);

    let balance = fx
        .api
        .ledger()
        .get_balance(fx.program_id(), customer)
        .await
        .unwrap();
    let txs = fx
        .api
        .ledger()
        .list_transactions(fx.program_id(), customer, 100)
        .await
        .unwrap();

    let sum: i64 = txs.iter().map(|tx| tx.amount).sum();
    assert_eq!(balance.current_balance, 110);
    assert_eq!(balance.current_balance, sum);
    assert_eq!(balance.total_earned, 150);
    assert_eq!(balance.total_spent, 40);
    assert_eq!(balance.lifetime_value, Decimal::new(5_075, 2));
}

#[tokio::test]
async fn test_debit_beyond_balance_is_rejected_without_trace() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Bruno").await;
    fx.credit(customer, 80).await;

    let err = fx
        .api
        .ledger()
        .debit(fx.spend(customer, 100))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LoyaltyError::InsufficientBalance {
            required: 100,
            available: 80
        }
    ));
    assert_eq!(fx.balance(customer).await, 80);
    assert_eq!(fx.store.transaction_count(fx.program_id(), customer), 1);
}

#[tokio::test]
async fn test_movement_validation() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Caio").await;

    let zero = fx.api.credit_tokens(fx.movement(customer, 0)).await;
    assert_eq!(zero.error, Some(ErrorKind::ValidationError));

    let spend_as_credit = fx
        .api
        .credit_tokens(fx.spend(customer, 10))
        .await;
    assert_eq!(spend_as_credit.error, Some(ErrorKind::ValidationError));

    let blank_reason = fx
        .api
        .ledger()
        .adjust_tokens(fx.program_id(), customer, 5, "  ")
        .await;
    assert!(matches!(blank_reason, Err(LoyaltyError::Validation(_))));
}

#[tokio::test]
async fn test_purchase_below_threshold_still_recorded() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Dani").await;

    let result = fx
        .api
        .award_purchase(fx.program_id(), customer, Decimal::from(5), None)
        .await;
    let entry = result.data.unwrap();

    assert_eq!(entry.tokens, 0);
    assert_eq!(entry.balance.current_balance, 0);
    assert_eq!(entry.balance.lifetime_value, Decimal::from(5));
}

// ==================== 规则 ====================

#[tokio::test]
async fn test_action_rule_respects_daily_cap() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Eva").await;
    fx.api
        .programs()
        .upsert_rule(UpsertRuleRequest {
            id: None,
            program_id: fx.program_id(),
            action_type: ActionType::Appointment,
            base_amount: 10,
            multiplier: Decimal::ONE,
            max_per_period: Some(10),
            period_type: Some(PeriodType::Day),
            is_active: true,
        })
        .await
        .unwrap();

    let award = || {
        fx.api.ledger().award_action(
            fx.program_id(),
            customer,
            ActionType::Appointment,
            ActionContext::default(),
        )
    };

    let first = award().await.unwrap();
    assert_eq!(first.tokens, 10);
    assert_eq!(first.balance.current_balance, 10);

    let second = award().await.unwrap();
    assert_eq!(second.tokens, 0);
    assert!(second.transaction.is_none());
    assert_eq!(second.balance.current_balance, 10);

    fx.clock.advance(Duration::days(1));
    let next_day = award().await.unwrap();
    assert_eq!(next_day.tokens, 10);
    assert_eq!(fx.balance(customer).await, 20);
}

fn capped_rule(fx: &common::Fixture, action_type: ActionType, cap: i64) -> UpsertRuleRequest {
    UpsertRuleRequest {
        id: None,
        program_id: fx.program_id(),
        action_type,
        base_amount: 10,
        multiplier: Decimal::ONE,
        max_per_period: Some(cap),
        period_type: Some(PeriodType::Day),
        is_active: true,
    }
}

#[tokio::test]
async fn test_daily_cap_survives_rule_revision() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Gil").await;
    let programs = fx.api.programs();
    let ledger = fx.api.ledger();

    programs
        .upsert_rule(capped_rule(&fx, ActionType::Referral, 10))
        .await
        .unwrap();
    let first = ledger
        .award_action(fx.program_id(), customer, ActionType::Referral, ActionContext::default())
        .await
        .unwrap();
    assert_eq!(first.tokens, 10);

    // 同一天重新保存规则，得到新的规则 id
    fx.clock.advance(Duration::hours(1));
    let revised = programs
        .upsert_rule(capped_rule(&fx, ActionType::Referral, 10))
        .await
        .unwrap();
    assert_ne!(Some(revised.id), first.transaction.as_ref().and_then(|t| t.reference_id));

    let second = ledger
        .award_action(fx.program_id(), customer, ActionType::Referral, ActionContext::default())
        .await
        .unwrap();
    assert_eq!(second.tokens, 0);
    assert!(second.transaction.is_none());
    assert_eq!(fx.balance(customer).await, 10);
}

#[tokio::test]
async fn test_evaluate_without_active_rule_is_zero() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Hana").await;
    let rules = fx.api.ledger().rules();

    assert_eq!(
        rules
            .evaluate(fx.program_id(), customer, ActionType::Signup)
            .await
            .unwrap(),
        0
    );

    fx.api
        .programs()
        .upsert_rule(UpsertRuleRequest {
            is_active: false,
            ..capped_rule(&fx, ActionType::Signup, 100)
        })
        .await
        .unwrap();
    assert_eq!(
        rules
            .evaluate(fx.program_id(), customer, ActionType::Signup)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_evaluate_clamps_to_remaining_cap() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Ines").await;
    fx.api
        .programs()
        .upsert_rule(capped_rule(&fx, ActionType::Review, 15))
        .await
        .unwrap();
    let evaluate = || {
        fx.api
            .ledger()
            .rules()
            .evaluate(fx.program_id(), customer, ActionType::Review)
    };
    let award = || {
        fx.api.ledger().award_action(
            fx.program_id(),
            customer,
            ActionType::Review,
            ActionContext::default(),
        )
    };

    assert_eq!(evaluate().await.unwrap(), 10);
    award().await.unwrap();
    assert_eq!(evaluate().await.unwrap(), 5);
    award().await.unwrap();
    // 上限用完后为 0，不会为负
    assert_eq!(evaluate().await.unwrap(), 0);
    assert_eq!(fx.balance(customer).await, 15);
}

#[tokio::test]
async fn test_action_without_rule_awards_nothing() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Fabio").await;

    let result = fx
        .api
        .ledger()
        .award_action(
            fx.program_id(),
            customer,
            ActionType::Review,
            ActionContext::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.tokens, 0);
    assert_eq!(fx.store.transaction_count(fx.program_id(), customer), 0);
}

#[tokio::test]
async fn test_membership_multiplier_applies_to_purchases() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Gabi").await;
    let plan = fx.gold_plan().await;
    fx.api
        .memberships()
        .create_membership(fx.new_membership(customer, plan, false))
        .await
        .unwrap();

    let entry = fx
        .api
        .ledger()
        .award_purchase(fx.program_id(), customer, Decimal::from(50), None)
        .await
        .unwrap();
    assert_eq!(entry.tokens, 100);
}

// ==================== 过期 ====================

#[tokio::test]
async fn test_lazy_expiry_on_read() {
    let fx = fixture(2025, 1, 1, 30).await;
    let customer = fx.customer("Hugo").await;
    fx.credit(customer, 100).await;

    fx.clock.advance(Duration::days(30));
    assert_eq!(fx.balance(customer).await, 100);

    fx.clock.advance(Duration::hours(1));
    let balance = fx
        .api
        .ledger()
        .get_balance(fx.program_id(), customer)
        .await
        .unwrap();
    assert_eq!(balance.current_balance, 0);
    assert_eq!(balance.total_expired, 100);

    let txs = fx
        .api
        .ledger()
        .list_transactions(fx.program_id(), customer, 10)
        .await
        .unwrap();
    let expirations: Vec<_> = txs
        .iter()
        .filter(|tx| tx.transaction_type == TransactionType::Expiration)
        .collect();
    assert_eq!(expirations.len(), 1);
    assert_eq!(expirations[0].amount, -100);

    // 再读一次不会重复补记
    assert_eq!(fx.balance(customer).await, 0);
    assert_eq!(fx.store.transaction_count(fx.program_id(), customer), 2);
}

#[tokio::test]
async fn test_expiry_sweep_is_idempotent_with_lazy_expiry() {
    let fx = fixture(2025, 1, 1, 30).await;
    let spent_some = fx.customer("Iris").await;
    let untouched = fx.customer("Joao").await;

    fx.credit(spent_some, 100).await;
    fx.api
        .ledger()
        .adjust_tokens(fx.program_id(), spent_some, -40, "manual debit")
        .await
        .unwrap();
    fx.credit(untouched, 70).await;

    fx.clock.advance(Duration::days(31));
    let report = fx
        .api
        .ledger()
        .expire_tokens_sweep(fx.program_id())
        .await
        .unwrap();
    assert_eq!(report.customers, 2);
    assert_eq!(report.tokens_expired, 60 + 70);
    assert_eq!(report.errors, 0);

    assert_eq!(fx.balance(spent_some).await, 0);
    assert_eq!(fx.balance(untouched).await, 0);

    let again = fx
        .api
        .ledger()
        .expire_tokens_sweep(fx.program_id())
        .await
        .unwrap();
    assert_eq!(again.tokens_expired, 0);
}

#[tokio::test]
async fn test_fresh_credits_survive_expiry() {
    let fx = fixture(2025, 1, 1, 30).await;
    let customer = fx.customer("Lia").await;
    fx.credit(customer, 100).await;

    fx.clock.advance(Duration::days(20));
    fx.credit(customer, 50).await;

    fx.clock.advance(Duration::days(11));
    let balance = fx
        .api
        .ledger()
        .get_balance(fx.program_id(), customer)
        .await
        .unwrap();
    assert_eq!(balance.current_balance, 50);
    assert_eq!(balance.total_expired, 100);
}

// ==================== 对账 ====================

#[tokio::test]
async fn test_reconcile_repairs_drifted_projection() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Mia").await;
    fx.credit(customer, 40).await;

    let mut drifted = fx
        .api
        .ledger()
        .get_balance(fx.program_id(), customer)
        .await
        .unwrap();
    drifted.current_balance = 9_999;
    fx.store.put_balance(drifted);

    let report = fx
        .api
        .ledger()
        .reconcile(fx.program_id(), customer)
        .await
        .unwrap();
    assert!(report.drifted);
    assert_eq!(report.replayed.current_balance, 40);
    assert_eq!(fx.balance(customer).await, 40);

    let clean = fx
        .api
        .ledger()
        .reconcile(fx.program_id(), customer)
        .await
        .unwrap();
    assert!(!clean.drifted);
}

// ==================== 等级 ====================

#[tokio::test]
async fn test_tier_recomputed_on_every_ledger_write() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Joana").await;
    let ledger = fx.api.ledger();

    let credited = ledger.credit(fx.movement(customer, 600)).await.unwrap();
    assert_eq!(credited.balance.tier, Tier::Silver);

    // 默认按累计获得计算，消费不会降级
    let debited = ledger.debit(fx.spend(customer, 300)).await.unwrap();
    assert_eq!(debited.balance.current_balance, 300);
    assert_eq!(debited.balance.tier, Tier::Silver);

    let promoted = ledger.credit(fx.movement(customer, 1_500)).await.unwrap();
    assert_eq!(promoted.balance.total_earned, 2_100);
    assert_eq!(promoted.balance.tier, Tier::Gold);

    let read = ledger.get_balance(fx.program_id(), customer).await.unwrap();
    assert_eq!(read.tier, Tier::Gold);
}
