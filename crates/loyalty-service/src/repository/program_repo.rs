//! 积分计划与规则仓储

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::ProgramRepositoryTrait;
use crate::error::{LoyaltyError, Result};
use crate::models::{ActionType, Program, TokenRule};

const PROGRAM_COLUMNS: &str = r#"
    id, tenant_id, tenant_name, name, currency_name, tokens_per_currency,
    tokens_currency_threshold, tokens_expiry_days, reactivation_months,
    membership_reminder_days, is_active, created_at, updated_at
"#;

pub struct ProgramRepository {
    pool: PgPool,
}

impl ProgramRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建计划
    ///
    /// 每个租户一个启用计划由部分唯一索引保证，冲突时转为校验错误
    pub async fn create_program(&self, program: &Program) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO loyalty_programs (id, tenant_id, tenant_name, name, currency_name,
                                          tokens_per_currency, tokens_currency_threshold,
                                          tokens_expiry_days, reactivation_months,
                                          membership_reminder_days, is_active,
                                          created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(program.id)
        .bind(program.tenant_id)
        .bind(&program.tenant_name)
        .bind(&program.name)
        .bind(&program.currency_name)
        .bind(program.tokens_per_currency)
        .bind(program.tokens_currency_threshold)
        .bind(program.tokens_expiry_days)
        .bind(program.reactivation_months)
        .bind(program.membership_reminder_days)
        .bind(program.is_active)
        .bind(program.created_at)
        .bind(program.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(LoyaltyError::validation(format!(
                    "租户 {} 已存在启用中的积分计划",
                    program.tenant_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_program(&self, id: Uuid) -> Result<Option<Program>> {
        let sql = format!("SELECT {} FROM loyalty_programs WHERE id = $1", PROGRAM_COLUMNS);
        let program = sqlx::query_as::<_, Program>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(program)
    }

    pub async fn get_active_program(&self, tenant_id: Uuid) -> Result<Option<Program>> {
        let sql = format!(
            "SELECT {} FROM loyalty_programs WHERE tenant_id = $1 AND is_active",
            PROGRAM_COLUMNS
        );
        let program = sqlx::query_as::<_, Program>(&sql)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(program)
    }

    pub async fn list_active_programs(&self) -> Result<Vec<Program>> {
        let sql = format!(
            "SELECT {} FROM loyalty_programs WHERE is_active ORDER BY created_at",
            PROGRAM_COLUMNS
        );
        let programs = sqlx::query_as::<_, Program>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(programs)
    }

    /// 按 id 新增或覆盖规则
    pub async fn upsert_rule(&self, rule: &TokenRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loyalty_token_rules (id, program_id, action_type, base_amount, multiplier,
                                             max_per_period, period_type, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                action_type = EXCLUDED.action_type,
                base_amount = EXCLUDED.base_amount,
                multiplier = EXCLUDED.multiplier,
                max_per_period = EXCLUDED.max_per_period,
                period_type = EXCLUDED.period_type,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(rule.id)
        .bind(rule.program_id)
        .bind(rule.action_type)
        .bind(rule.base_amount)
        .bind(rule.multiplier)
        .bind(rule.max_per_period)
        .bind(rule.period_type)
        .bind(rule.is_active)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_rules(
        &self,
        program_id: Uuid,
        action_type: ActionType,
    ) -> Result<Vec<TokenRule>> {
        let rules = sqlx::query_as::<_, TokenRule>(
            r#"
            SELECT id, program_id, action_type, base_amount, multiplier,
                   max_per_period, period_type, is_active, created_at
            FROM loyalty_token_rules
            WHERE program_id = $1 AND action_type = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(program_id)
        .bind(action_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }
}

#[async_trait]
impl ProgramRepositoryTrait for ProgramRepository {
    async fn create_program(&self, program: &Program) -> Result<()> {
        self.create_program(program).await
    }

    async fn get_program(&self, id: Uuid) -> Result<Option<Program>> {
        self.get_program(id).await
    }

    async fn get_active_program(&self, tenant_id: Uuid) -> Result<Option<Program>> {
        self.get_active_program(tenant_id).await
    }

    async fn list_active_programs(&self) -> Result<Vec<Program>> {
        self.list_active_programs().await
    }

    async fn upsert_rule(&self, rule: &TokenRule) -> Result<()> {
        self.upsert_rule(rule).await
    }

    async fn list_rules(
        &self,
        program_id: Uuid,
        action_type: ActionType,
    ) -> Result<Vec<TokenRule>> {
        self.list_rules(program_id, action_type).await
    }
}
