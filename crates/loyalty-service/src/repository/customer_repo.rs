//! 客户读模型仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::CustomerRepositoryTrait;
use crate::error::Result;
use crate::models::Customer;

pub struct CustomerRepository {
    pool: PgPool,
}

impl CustomerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中更新最近互动时间
    ///
    /// 只会向后推进，客户不存在时忽略
    pub async fn touch_in_tx(
        conn: &mut PgConnection,
        customer_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE customers
            SET last_interaction_at = GREATEST(COALESCE(last_interaction_at, $2), $2)
            WHERE id = $1
            "#,
        )
        .bind(customer_id)
        .bind(at)
        .execute(conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CustomerRepositoryTrait for CustomerRepository {
    async fn upsert_customer(&self, customer: &Customer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (id, tenant_id, name, phone, last_interaction_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                phone = EXCLUDED.phone,
                last_interaction_at = GREATEST(customers.last_interaction_at,
                                               EXCLUDED.last_interaction_at)
            "#,
        )
        .bind(customer.id)
        .bind(customer.tenant_id)
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(customer.last_interaction_at)
        .bind(customer.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT id, tenant_id, name, phone, last_interaction_at, created_at
            FROM customers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(customer)
    }

    async fn touch_customer(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::touch_in_tx(&mut conn, id, at).await
    }

    async fn list_inactive_customers(
        &self,
        tenant_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Customer>> {
        let customers = sqlx::query_as::<_, Customer>(
            r#"
            SELECT id, tenant_id, name, phone, last_interaction_at, created_at
            FROM customers
            WHERE tenant_id = $1
              AND COALESCE(last_interaction_at, created_at) < $2
            ORDER BY COALESCE(last_interaction_at, created_at)
            "#,
        )
        .bind(tenant_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(customers)
    }
}
