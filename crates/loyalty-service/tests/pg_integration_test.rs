//! Postgres 仓储集成测试
//!
//! 验证 SQL 实现与内存实现的语义一致，重点是行锁下的并发扣减和幂等日志。
//!
//! ## 运行方式
//!
//! ```bash
//! TEST_DATABASE_URL=postgres://... cargo test --test pg_integration_test -- --ignored
//! ```

use std::sync::Arc;

use chrono::Duration;
use futures::future::join_all;
use loyalty::dto::{TokenMovementRequest, UpsertCustomerRequest};
use loyalty::repository::NotificationLogRepository;
use loyalty::repository::NotificationLogRepositoryTrait;
use loyalty::{
    ErrorKind, LoyaltyApi, MessageType, NewProgram, NewReward, NotificationLogEntry, Program,
    RewardType, TierClassifier, TransactionType,
};
use loyalty_shared::clock::{Clock, FixedClock};
use loyalty_shared::database::Database;
use loyalty_shared::test_utils::{clock_at, test_customer_id, test_database_config, test_tenant_id};
use rust_decimal::Decimal;
use uuid::Uuid;

struct PgFixture {
    api: LoyaltyApi,
    db: Database,
    clock: FixedClock,
    program: Program,
}

async fn setup(expiry_days: i32) -> PgFixture {
    // 测试配置开启 run_migrations，connect 内已执行迁移
    let db = Database::connect(&test_database_config())
        .await
        .expect("数据库连接失败");

    let clock = clock_at(2025, 1, 1);
    let api = LoyaltyApi::postgres(
        db.pool().clone(),
        Arc::new(clock.clone()),
        TierClassifier::default(),
    );
    let program = api
        .programs()
        .create_program(NewProgram {
            tenant_id: test_tenant_id(),
            tenant_name: "PG Clinic".to_string(),
            name: "PG Rewards".to_string(),
            currency_name: "points".to_string(),
            tokens_per_currency: Decimal::ONE,
            tokens_currency_threshold: Decimal::ZERO,
            tokens_expiry_days: expiry_days,
            reactivation_months: 3,
            membership_reminder_days: 7,
        })
        .await
        .expect("创建计划失败");

    PgFixture {
        api,
        db,
        clock,
        program,
    }
}

impl PgFixture {
    async fn customer(&self) -> Uuid {
        let id = test_customer_id();
        self.api
            .programs()
            .upsert_customer(UpsertCustomerRequest {
                id,
                tenant_id: self.program.tenant_id,
                name: "PG Customer".to_string(),
                phone: None,
            })
            .await
            .expect("创建客户失败");
        id
    }

    fn movement(&self, customer_id: Uuid, amount: i64, kind: TransactionType) -> TokenMovementRequest {
        TokenMovementRequest {
            program_id: self.program.id,
            customer_id,
            amount,
            transaction_type: kind,
            description: "pg test".to_string(),
            reference_type: None,
            reference_id: None,
        }
    }
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_pg_connect_applies_migrations() {
    let config = test_database_config();
    assert!(config.run_migrations);
    let db = Database::connect(&config).await.expect("数据库连接失败");

    // 迁移后的表结构可直接使用，包括按行为统计上限的列
    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM loyalty_transactions WHERE action_type IS NOT NULL AND amount < 0",
    )
    .fetch_one(db.pool())
    .await
    .expect("迁移后的表应可查询");
    assert_eq!(rows, 0);
    db.close().await;
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_pg_concurrent_debits_never_overdraw() {
    let fx = setup(0).await;
    let customer = fx.customer().await;
    fx.api
        .ledger()
        .credit(fx.movement(customer, 100, TransactionType::Manual))
        .await
        .unwrap();

    let debits = (0..8).map(|_| {
        let api = fx.api.clone();
        let request = fx.movement(customer, 30, TransactionType::Spend);
        tokio::spawn(async move { api.debit_tokens(request).await })
    });
    let results = join_all(debits).await;

    let ok = results
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .filter(|resp| resp.is_ok())
        .count();
    assert_eq!(ok, 3);

    let balance = fx
        .api
        .ledger()
        .get_balance(fx.program.id, customer)
        .await
        .unwrap();
    assert_eq!(balance.current_balance, 10);

    let report = fx.api.ledger().reconcile(fx.program.id, customer).await.unwrap();
    assert!(!report.drifted);
    fx.db.close().await;
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_pg_redeem_rolls_back_on_insufficient_balance() {
    let fx = setup(0).await;
    let customer = fx.customer().await;
    let reward = fx
        .api
        .redemptions()
        .create_reward(NewReward {
            program_id: fx.program.id,
            name: "Massage".to_string(),
            description: None,
            reward_type: RewardType::FreeService,
            tokens_required: 100,
            stock_limit: Some(1),
            valid_days: 7,
        })
        .await
        .unwrap();
    fx.api
        .ledger()
        .credit(fx.movement(customer, 80, TransactionType::Manual))
        .await
        .unwrap();

    let resp = fx.api.redeem_reward(fx.program.id, customer, reward.id).await;
    assert_eq!(resp.error, Some(ErrorKind::InsufficientBalance));

    let reward = fx.api.redemptions().get_reward(reward.id).await.unwrap();
    assert_eq!(reward.stock_used, 0);
    fx.db.close().await;
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_pg_lazy_expiry() {
    let fx = setup(30).await;
    let customer = fx.customer().await;
    fx.api
        .ledger()
        .credit(fx.movement(customer, 100, TransactionType::Manual))
        .await
        .unwrap();

    fx.clock.advance(Duration::days(31));
    let balance = fx
        .api
        .ledger()
        .get_balance(fx.program.id, customer)
        .await
        .unwrap();
    assert_eq!(balance.current_balance, 0);
    assert_eq!(balance.total_expired, 100);

    let report = fx.api.ledger().expire_tokens_sweep(fx.program.id).await.unwrap();
    assert_eq!(report.tokens_expired, 0);
    fx.db.close().await;
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_pg_notification_log_is_idempotent() {
    let fx = setup(0).await;
    let customer = fx.customer().await;
    let log = NotificationLogRepository::new(fx.db.pool().clone());

    let entry = |at| {
        NotificationLogEntry::new(
            fx.program.id,
            customer,
            MessageType::Reactivation,
            "We miss you".to_string(),
            "whatsapp",
            at,
        )
    };

    let now = fx.clock.now();
    assert!(log.try_record(&entry(now), None).await.unwrap());
    assert!(!log.try_record(&entry(now), None).await.unwrap());
    assert!(
        !log
            .try_record(&entry(now + Duration::days(60)), None)
            .await
            .unwrap()
    );
    assert!(
        log.exists(fx.program.id, customer, MessageType::Reactivation, None)
            .await
            .unwrap()
    );
    fx.db.close().await;
}
