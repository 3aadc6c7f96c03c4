//! 集成测试共用夹具
//!
//! 内存仓储 + 固定时钟，每个测试独立一份数据

#![allow(dead_code)]

use std::sync::Arc;

use loyalty::dto::{TokenMovementRequest, UpsertCustomerRequest};
use loyalty::{
    BillingCycle, LoyaltyApi, MemoryStore, NewMembership, NewMembershipPlan, NewProgram,
    NewReward, Program, Reward, RewardType, TierClassifier, TransactionType,
};
use loyalty_shared::clock::FixedClock;
use loyalty_shared::test_utils::{clock_at, test_customer_id, test_tenant_id};
use rust_decimal::Decimal;
use uuid::Uuid;

pub struct Fixture {
    pub api: LoyaltyApi,
    pub store: Arc<MemoryStore>,
    pub clock: FixedClock,
    pub program: Program,
}

/// 建立一个启用中的计划：每 1 元返 1 积分，10 元起返
pub async fn fixture(year: i32, month: u32, day: u32, expiry_days: i32) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let clock = clock_at(year, month, day);
    let api = LoyaltyApi::in_memory(
        store.clone(),
        Arc::new(clock.clone()),
        TierClassifier::default(),
    );

    let program = api
        .programs()
        .create_program(NewProgram {
            tenant_id: test_tenant_id(),
            tenant_name: "Glow Clinic".to_string(),
            name: "Glow Rewards".to_string(),
            currency_name: "points".to_string(),
            tokens_per_currency: Decimal::ONE,
            tokens_currency_threshold: Decimal::from(10),
            tokens_expiry_days: expiry_days,
            reactivation_months: 3,
            membership_reminder_days: 7,
        })
        .await
        .expect("create program");

    Fixture {
        api,
        store,
        clock,
        program,
    }
}

impl Fixture {
    pub fn program_id(&self) -> Uuid {
        self.program.id
    }

    pub async fn customer(&self, name: &str) -> Uuid {
        let id = test_customer_id();
        self.api
            .programs()
            .upsert_customer(UpsertCustomerRequest {
                id,
                tenant_id: self.program.tenant_id,
                name: name.to_string(),
                phone: Some("+5511999990000".to_string()),
            })
            .await
            .expect("upsert customer");
        id
    }

    pub fn movement(&self, customer_id: Uuid, amount: i64) -> TokenMovementRequest {
        TokenMovementRequest {
            program_id: self.program.id,
            customer_id,
            amount,
            transaction_type: TransactionType::Manual,
            description: "test".to_string(),
            reference_type: None,
            reference_id: None,
        }
    }

    pub fn spend(&self, customer_id: Uuid, amount: i64) -> TokenMovementRequest {
        TokenMovementRequest {
            transaction_type: TransactionType::Spend,
            ..self.movement(customer_id, amount)
        }
    }

    pub async fn credit(&self, customer_id: Uuid, amount: i64) {
        self.api
            .ledger()
            .credit(self.movement(customer_id, amount))
            .await
            .expect("credit");
    }

    pub async fn balance(&self, customer_id: Uuid) -> i64 {
        self.api
            .ledger()
            .get_balance(self.program.id, customer_id)
            .await
            .expect("balance")
            .current_balance
    }

    pub async fn reward(&self, tokens_required: i64, stock_limit: Option<i64>) -> Reward {
        self.api
            .redemptions()
            .create_reward(NewReward {
                program_id: self.program.id,
                name: "Free facial".to_string(),
                description: None,
                reward_type: RewardType::FreeService,
                tokens_required,
                stock_limit,
                valid_days: 30,
            })
            .await
            .expect("create reward")
    }

    /// 月付 2 倍积分会员计划
    pub async fn gold_plan(&self) -> Uuid {
        self.api
            .memberships()
            .create_plan(NewMembershipPlan {
                program_id: self.program.id,
                name: "Gold".to_string(),
                description: None,
                monthly_price: Some(Decimal::new(4_990, 2)),
                annual_price: Some(Decimal::new(49_900, 2)),
                benefits: serde_json::json!(["priority booking"]),
                tokens_multiplier: Decimal::from(2),
                priority_booking: true,
            })
            .await
            .expect("create plan")
            .id
    }

    pub fn new_membership(&self, customer_id: Uuid, plan_id: Uuid, auto_renew: bool) -> NewMembership {
        NewMembership {
            program_id: self.program.id,
            customer_id,
            plan_id,
            billing_cycle: BillingCycle::Monthly,
            auto_renew,
            payment_method: Some("card".to_string()),
            notes: None,
            payment_pending: false,
        }
    }
}
