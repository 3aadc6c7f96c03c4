//! 会员计划与会员仓储

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::traits::{ExpiringMembership, MembershipRepositoryTrait};
use crate::error::Result;
use crate::models::{Membership, MembershipPlan, MembershipStatus};

const PLAN_COLUMNS: &str = r#"
    id, program_id, name, description, monthly_price, annual_price, benefits,
    tokens_multiplier, priority_booking, is_active, created_at
"#;

const MEMBERSHIP_COLUMNS: &str = r#"
    m.id, m.program_id, m.customer_id, m.plan_id, m.status, m.billing_cycle, m.start_date,
    m.end_date, m.auto_renew, m.payment_method, m.payment_amount, m.notes, m.cancelled_at,
    m.created_at, m.updated_at
"#;

pub struct MembershipRepository {
    pool: PgPool,
}

impl MembershipRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipRepositoryTrait for MembershipRepository {
    async fn create_plan(&self, plan: &MembershipPlan) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO membership_plans (id, program_id, name, description, monthly_price,
                                          annual_price, benefits, tokens_multiplier,
                                          priority_booking, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(plan.id)
        .bind(plan.program_id)
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.monthly_price)
        .bind(plan.annual_price)
        .bind(&plan.benefits)
        .bind(plan.tokens_multiplier)
        .bind(plan.priority_booking)
        .bind(plan.is_active)
        .bind(plan.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<MembershipPlan>> {
        let sql = format!("SELECT {} FROM membership_plans WHERE id = $1", PLAN_COLUMNS);
        let plan = sqlx::query_as::<_, MembershipPlan>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(plan)
    }

    async fn list_plans(&self, program_id: Uuid) -> Result<Vec<MembershipPlan>> {
        let sql = format!(
            "SELECT {} FROM membership_plans WHERE program_id = $1 ORDER BY created_at",
            PLAN_COLUMNS
        );
        let plans = sqlx::query_as::<_, MembershipPlan>(&sql)
            .bind(program_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(plans)
    }

    async fn create_membership(&self, membership: &Membership) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO memberships (id, program_id, customer_id, plan_id, status, billing_cycle,
                                     start_date, end_date, auto_renew, payment_method,
                                     payment_amount, notes, cancelled_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(membership.id)
        .bind(membership.program_id)
        .bind(membership.customer_id)
        .bind(membership.plan_id)
        .bind(membership.status)
        .bind(membership.billing_cycle)
        .bind(membership.start_date)
        .bind(membership.end_date)
        .bind(membership.auto_renew)
        .bind(&membership.payment_method)
        .bind(membership.payment_amount)
        .bind(&membership.notes)
        .bind(membership.cancelled_at)
        .bind(membership.created_at)
        .bind(membership.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_membership(&self, id: Uuid) -> Result<Option<Membership>> {
        let sql = format!("SELECT {} FROM memberships m WHERE m.id = $1", MEMBERSHIP_COLUMNS);
        let membership = sqlx::query_as::<_, Membership>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(membership)
    }

    async fn update_membership(
        &self,
        membership: &Membership,
        expected: MembershipStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE memberships
            SET status = $3, start_date = $4, end_date = $5, payment_amount = $6,
                cancelled_at = $7, updated_at = $8
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(membership.id)
        .bind(expected)
        .bind(membership.status)
        .bind(membership.start_date)
        .bind(membership.end_date)
        .bind(membership.payment_amount)
        .bind(membership.cancelled_at)
        .bind(membership.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_active_ending_on(
        &self,
        program_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<ExpiringMembership>> {
        let sql = format!(
            r#"
            SELECT {}, c.name AS customer_name, p.name AS plan_name
            FROM memberships m
            JOIN customers c ON c.id = m.customer_id
            JOIN membership_plans p ON p.id = m.plan_id
            WHERE m.program_id = $1 AND m.status = 'active' AND m.end_date = $2
            ORDER BY m.created_at
            "#,
            MEMBERSHIP_COLUMNS
        );
        let rows = sqlx::query_as::<_, ExpiringMembership>(&sql)
            .bind(program_id)
            .bind(date)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_due_for_sweep(
        &self,
        program_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<Membership>> {
        let sql = format!(
            "SELECT {} FROM memberships m \
             WHERE m.program_id = $1 AND m.status = 'active' AND m.end_date < $2 \
             ORDER BY m.end_date",
            MEMBERSHIP_COLUMNS
        );
        let memberships = sqlx::query_as::<_, Membership>(&sql)
            .bind(program_id)
            .bind(today)
            .fetch_all(&self.pool)
            .await?;
        Ok(memberships)
    }

    async fn active_multiplier(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        today: NaiveDate,
    ) -> Result<Option<Decimal>> {
        let multiplier: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT MAX(p.tokens_multiplier)
            FROM memberships m
            JOIN membership_plans p ON p.id = m.plan_id
            WHERE m.program_id = $1 AND m.customer_id = $2
              AND m.status = 'active' AND m.end_date >= $3
            "#,
        )
        .bind(program_id)
        .bind(customer_id)
        .bind(today)
        .fetch_one(&self.pool)
        .await?;
        Ok(multiplier)
    }

    async fn get_active_membership(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        today: NaiveDate,
    ) -> Result<Option<Membership>> {
        let sql = format!(
            "SELECT {} FROM memberships m \
             WHERE m.program_id = $1 AND m.customer_id = $2 \
               AND m.status = 'active' AND m.end_date >= $3 \
             ORDER BY m.end_date DESC LIMIT 1",
            MEMBERSHIP_COLUMNS
        );
        let membership = sqlx::query_as::<_, Membership>(&sql)
            .bind(program_id)
            .bind(customer_id)
            .bind(today)
            .fetch_optional(&self.pool)
            .await?;
        Ok(membership)
    }

    async fn membership_stats(
        &self,
        program_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE $2::timestamptz IS NULL OR created_at >= $2) AS created,
                COUNT(*) FILTER (WHERE status = 'active') AS active
            FROM memberships
            WHERE program_id = $1
            "#,
        )
        .bind(program_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("created"), row.get("active")))
    }
}
