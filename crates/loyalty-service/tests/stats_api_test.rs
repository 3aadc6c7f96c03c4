//! 统计与对外接口测试

mod common;

use chrono::Duration;
use loyalty::dto::StatsPeriod;
use loyalty::ErrorKind;
use uuid::Uuid;

use common::fixture;

#[tokio::test]
async fn test_stats_cover_ledger_redemptions_and_memberships() {
    let fx = fixture(2025, 3, 10, 30).await;
    let ana = fx.customer("Ana").await;
    let bia = fx.customer("Bia").await;
    let reward = fx.reward(30, None).await;
    let plan = fx.gold_plan().await;

    fx.credit(ana, 100).await;
    fx.credit(bia, 20).await;
    let receipt = fx
        .api
        .redemptions()
        .redeem(fx.program_id(), ana, reward.id)
        .await
        .unwrap();
    fx.api
        .redemptions()
        .mark_used(fx.program_id(), receipt.redemption.id)
        .await
        .unwrap();
    fx.api
        .memberships()
        .create_membership(fx.new_membership(bia, plan, false))
        .await
        .unwrap();

    let stats = fx
        .api
        .get_stats(fx.program_id(), StatsPeriod::Month)
        .await
        .data
        .unwrap();

    assert_eq!(stats.tokens_issued, 120);
    assert_eq!(stats.tokens_spent, 30);
    assert_eq!(stats.tokens_expired, 0);
    assert_eq!(stats.redemptions_created, 1);
    assert_eq!(stats.redemptions_used, 1);
    assert_eq!(stats.memberships_created, 1);
    assert_eq!(stats.active_memberships, 1);
    assert_eq!(stats.active_customers, 2);
}

#[tokio::test]
async fn test_stats_window_excludes_older_activity() {
    let fx = fixture(2025, 3, 10, 0).await;
    let ana = fx.customer("Ana").await;
    fx.credit(ana, 100).await;

    fx.clock.advance(Duration::days(1));
    let today = fx
        .api
        .get_stats(fx.program_id(), StatsPeriod::Day)
        .await
        .data
        .unwrap();
    assert_eq!(today.tokens_issued, 0);
    assert_eq!(today.active_customers, 0);

    let all = fx
        .api
        .get_stats(fx.program_id(), StatsPeriod::All)
        .await
        .data
        .unwrap();
    assert_eq!(all.tokens_issued, 100);
    assert!(all.since.is_none());
}

#[tokio::test]
async fn test_unknown_program_is_reported_not_thrown() {
    let fx = fixture(2025, 3, 10, 0).await;

    let stats = fx.api.get_stats(Uuid::now_v7(), StatsPeriod::Week).await;
    assert!(!stats.is_ok());
    assert_eq!(stats.error, Some(ErrorKind::NotFound));
    assert!(stats.message.is_some());

    let balance = fx.api.get_balance(Uuid::now_v7(), Uuid::now_v7()).await;
    assert_eq!(balance.error, Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_balance_for_unknown_customer_is_zero() {
    let fx = fixture(2025, 3, 10, 0).await;

    let resp = fx.api.get_balance(fx.program_id(), Uuid::now_v7()).await;
    let balance = resp.data.unwrap();
    assert_eq!(balance.current_balance, 0);
    assert_eq!(balance.total_earned, 0);
}

#[tokio::test]
async fn test_one_active_program_per_tenant() {
    let fx = fixture(2025, 3, 10, 0).await;

    let duplicate = fx
        .api
        .programs()
        .create_program(loyalty::NewProgram {
            tenant_id: fx.program.tenant_id,
            tenant_name: "Glow Clinic".to_string(),
            name: "Second".to_string(),
            currency_name: "stars".to_string(),
            tokens_per_currency: rust_decimal::Decimal::ONE,
            tokens_currency_threshold: rust_decimal::Decimal::ZERO,
            tokens_expiry_days: 0,
            reactivation_months: 3,
            membership_reminder_days: 7,
        })
        .await;
    assert!(matches!(duplicate, Err(loyalty::LoyaltyError::Validation(_))));

    let active = fx
        .api
        .programs()
        .get_active_program(fx.program.tenant_id)
        .await
        .unwrap();
    assert_eq!(active.map(|p| p.id), Some(fx.program.id));
}
