//! 积分计划、规则与客户管理

use loyalty_shared::clock::Clock;
use tracing::{info, instrument};
use uuid::Uuid;

use super::context::ServiceContext;
use super::dto::{UpsertCustomerRequest, UpsertRuleRequest};
use crate::error::{LoyaltyError, Result};
use crate::models::{Customer, NewProgram, Program, TokenRule};

pub struct ProgramService {
    ctx: ServiceContext,
}

impl ProgramService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// 创建积分计划，每个租户只能有一个启用中的计划
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id))]
    pub async fn create_program(&self, request: NewProgram) -> Result<Program> {
        request.validate()?;
        let program = request.into_program(Uuid::now_v7(), self.ctx.clock.now());
        self.ctx.repos.programs.create_program(&program).await?;
        info!(program_id = %program.id, name = %program.name, "积分计划已创建");
        Ok(program)
    }

    pub async fn get_program(&self, program_id: Uuid) -> Result<Program> {
        self.ctx
            .repos
            .programs
            .get_program(program_id)
            .await?
            .ok_or_else(|| LoyaltyError::not_found("program", program_id))
    }

    pub async fn get_active_program(&self, tenant_id: Uuid) -> Result<Option<Program>> {
        self.ctx.repos.programs.get_active_program(tenant_id).await
    }

    pub async fn list_active_programs(&self) -> Result<Vec<Program>> {
        self.ctx.repos.programs.list_active_programs().await
    }

    /// 新增或覆盖积分规则
    #[instrument(skip(self, request), fields(program_id = %request.program_id, action_type = ?request.action_type))]
    pub async fn upsert_rule(&self, request: UpsertRuleRequest) -> Result<TokenRule> {
        self.ctx.active_program(request.program_id).await?;

        let rule = TokenRule {
            id: request.id.unwrap_or_else(Uuid::now_v7),
            program_id: request.program_id,
            action_type: request.action_type,
            base_amount: request.base_amount,
            multiplier: request.multiplier,
            max_per_period: request.max_per_period,
            period_type: request.period_type,
            is_active: request.is_active,
            created_at: self.ctx.clock.now(),
        };
        rule.validate()?;

        self.ctx.repos.programs.upsert_rule(&rule).await?;
        info!(rule_id = %rule.id, "积分规则已保存");
        Ok(rule)
    }

    pub async fn list_rules(
        &self,
        program_id: Uuid,
        action_type: crate::models::ActionType,
    ) -> Result<Vec<TokenRule>> {
        self.ctx
            .repos
            .programs
            .list_rules(program_id, action_type)
            .await
    }

    /// 同步客户读模型
    pub async fn upsert_customer(&self, request: UpsertCustomerRequest) -> Result<Customer> {
        if request.name.trim().is_empty() {
            return Err(LoyaltyError::validation("客户名称不能为空"));
        }
        let mut customer = Customer::new(
            request.id,
            request.tenant_id,
            request.name,
            self.ctx.clock.now(),
        );
        customer.phone = request.phone;
        self.ctx.repos.customers.upsert_customer(&customer).await?;
        self.get_customer(customer.id).await
    }

    pub async fn get_customer(&self, customer_id: Uuid) -> Result<Customer> {
        self.ctx
            .repos
            .customers
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| LoyaltyError::not_found("customer", customer_id))
    }

    /// 记录一次非账本互动（如到店、预约）
    pub async fn touch_customer(&self, customer_id: Uuid) -> Result<()> {
        self.ctx
            .repos
            .customers
            .touch_customer(customer_id, self.ctx.clock.now())
            .await
    }
}
