//! MembershipService 集成测试

mod common;

use chrono::Duration;
use loyalty::{ErrorKind, LoyaltyError, MembershipStatus, NewMembership};
use loyalty_shared::clock::Clock;
use loyalty_shared::test_utils::date;
use rust_decimal::Decimal;

use common::fixture;

#[tokio::test]
async fn test_monthly_membership_period() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Ana").await;
    let plan = fx.gold_plan().await;

    let membership = fx
        .api
        .create_membership(fx.new_membership(customer, plan, false))
        .await
        .data
        .unwrap();

    assert_eq!(membership.status, MembershipStatus::Active);
    assert_eq!(membership.start_date, date(2025, 1, 1));
    assert_eq!(membership.end_date, date(2025, 2, 1));
    assert_eq!(membership.payment_amount, Some(Decimal::new(4_990, 2)));
}

#[tokio::test]
async fn test_cancel_stops_multiplier_immediately() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Bia").await;
    let plan = fx.gold_plan().await;
    let membership = fx
        .api
        .memberships()
        .create_membership(fx.new_membership(customer, plan, true))
        .await
        .unwrap();

    assert_eq!(
        fx.api
            .memberships()
            .active_multiplier(fx.program_id(), customer)
            .await
            .unwrap(),
        Decimal::from(2)
    );

    fx.clock.advance(Duration::days(14));
    let cancelled = fx.api.cancel_membership(membership.id).await.data.unwrap();
    assert_eq!(cancelled.status, MembershipStatus::Cancelled);
    assert_eq!(cancelled.cancelled_at.map(|t| t.date_naive()), Some(date(2025, 1, 15)));

    assert_eq!(
        fx.api
            .memberships()
            .active_multiplier(fx.program_id(), customer)
            .await
            .unwrap(),
        Decimal::ONE
    );
    assert!(
        fx.api
            .memberships()
            .get_active_membership(fx.program_id(), customer)
            .await
            .unwrap()
            .is_none()
    );

    let entry = fx
        .api
        .ledger()
        .award_purchase(fx.program_id(), customer, Decimal::from(40), None)
        .await
        .unwrap();
    assert_eq!(entry.tokens, 40);

    // 终态不可再取消
    let again = fx.api.cancel_membership(membership.id).await;
    assert_eq!(again.error, Some(ErrorKind::InvalidStateTransition));
}

#[tokio::test]
async fn test_pending_membership_activation() {
    let fx = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Caio").await;
    let plan = fx.gold_plan().await;

    let pending = fx
        .api
        .memberships()
        .create_membership(NewMembership {
            payment_pending: true,
            ..fx.new_membership(customer, plan, false)
        })
        .await
        .unwrap();
    assert_eq!(pending.status, MembershipStatus::Pending);
    assert_eq!(pending.payment_amount, None);
    assert_eq!(
        fx.api
            .memberships()
            .active_multiplier(fx.program_id(), customer)
            .await
            .unwrap(),
        Decimal::ONE
    );

    fx.clock.advance(Duration::days(3));
    let active = fx
        .api
        .memberships()
        .activate_membership(pending.id, Some(Decimal::new(4_990, 2)))
        .await
        .unwrap();
    assert_eq!(active.status, MembershipStatus::Active);
    assert_eq!(active.start_date, date(2025, 1, 4));
    assert_eq!(active.end_date, date(2025, 2, 4));

    // 开通与激活都算客户互动
    let stored = fx.api.programs().get_customer(customer).await.unwrap();
    assert_eq!(stored.last_interaction_at, Some(fx.clock.now()));

    let err = fx
        .api
        .memberships()
        .activate_membership(pending.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LoyaltyError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn test_plan_must_belong_to_program() {
    let fx = fixture(2025, 1, 1, 0).await;
    let other = fixture(2025, 1, 1, 0).await;
    let customer = fx.customer("Dora").await;
    let foreign_plan = other.gold_plan().await;

    let resp = fx
        .api
        .create_membership(fx.new_membership(customer, foreign_plan, false))
        .await;
    assert_eq!(resp.error, Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_expiry_sweep_renews_or_expires() {
    let fx = fixture(2025, 1, 31, 0).await;
    let renewing = fx.customer("Enzo").await;
    let lapsing = fx.customer("Fabi").await;
    let plan = fx.gold_plan().await;

    let renew = fx
        .api
        .memberships()
        .create_membership(fx.new_membership(renewing, plan, true))
        .await
        .unwrap();
    let lapse = fx
        .api
        .memberships()
        .create_membership(fx.new_membership(lapsing, plan, false))
        .await
        .unwrap();
    // 01-31 推进一个月截断为 02-28
    assert_eq!(renew.end_date, date(2025, 2, 28));

    // 结束日当天仍有效，不处理
    fx.clock.advance(Duration::days(28));
    let report = fx
        .api
        .memberships()
        .membership_expiry_sweep(fx.program_id())
        .await
        .unwrap();
    assert_eq!((report.renewed, report.expired), (0, 0));

    fx.clock.advance(Duration::days(1));
    let report = fx
        .api
        .memberships()
        .membership_expiry_sweep(fx.program_id())
        .await
        .unwrap();
    assert_eq!((report.renewed, report.expired), (1, 1));

    let renewed = fx.api.memberships().get_membership(renew.id).await.unwrap();
    assert_eq!(renewed.status, MembershipStatus::Active);
    assert_eq!(renewed.end_date, date(2025, 3, 28));

    let lapsed = fx.api.memberships().get_membership(lapse.id).await.unwrap();
    assert_eq!(lapsed.status, MembershipStatus::Expired);
    assert_eq!(
        fx.api
            .memberships()
            .active_multiplier(fx.program_id(), lapsing)
            .await
            .unwrap(),
        Decimal::ONE
    );
}
