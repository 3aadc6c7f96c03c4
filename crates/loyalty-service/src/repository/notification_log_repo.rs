//! 消息幂等日志仓储
//!
//! 真正的防重保障是 (program_id, customer_id, message_type, dedup_key) 唯一约束，
//! 回看窗口检查与插入在同一条语句里完成。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::NotificationLogRepositoryTrait;
use crate::error::Result;
use crate::models::{MessageType, NotificationLogEntry};

pub struct NotificationLogRepository {
    pool: PgPool,
}

impl NotificationLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLogRepositoryTrait for NotificationLogRepository {
    async fn exists(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        message_type: MessageType,
        since: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM loyalty_notification_log
                WHERE program_id = $1 AND customer_id = $2 AND message_type = $3
                  AND ($4::timestamptz IS NULL OR sent_at >= $4)
            )
            "#,
        )
        .bind(program_id)
        .bind(customer_id)
        .bind(message_type)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn try_record(
        &self,
        entry: &NotificationLogEntry,
        lookback_since: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO loyalty_notification_log (id, program_id, customer_id, message_type,
                                                  dedup_key, message, channel, sent_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8
            WHERE NOT EXISTS (
                SELECT 1 FROM loyalty_notification_log
                WHERE program_id = $2 AND customer_id = $3 AND message_type = $4
                  AND ($9::timestamptz IS NULL OR sent_at >= $9)
            )
            ON CONFLICT (program_id, customer_id, message_type, dedup_key) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(entry.program_id)
        .bind(entry.customer_id)
        .bind(entry.message_type)
        .bind(&entry.dedup_key)
        .bind(&entry.message)
        .bind(&entry.channel)
        .bind(entry.sent_at)
        .bind(lookback_since)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_for_customer(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<NotificationLogEntry>> {
        let entries = sqlx::query_as::<_, NotificationLogEntry>(
            r#"
            SELECT id, program_id, customer_id, message_type, dedup_key, message, channel, sent_at
            FROM loyalty_notification_log
            WHERE program_id = $1 AND customer_id = $2
            ORDER BY sent_at DESC
            "#,
        )
        .bind(program_id)
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
