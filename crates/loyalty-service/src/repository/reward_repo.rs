//! 奖励与兑换仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::ledger_repo::LedgerRepository;
use super::traits::{LedgerContext, RedeemCommand, RewardRepositoryTrait};
use crate::error::{LoyaltyError, Result};
use crate::models::{
    AppendGuard, NewTransaction, Redemption, RedemptionReceipt, RedemptionStatus, ReferenceType,
    Reward, TransactionType, generate_redemption_code,
};

const REWARD_COLUMNS: &str = r#"
    id, program_id, name, description, reward_type, tokens_required, stock_limit,
    stock_used, valid_days, is_active, created_at, updated_at
"#;

const REDEMPTION_COLUMNS: &str = r#"
    id, program_id, customer_id, reward_id, code, tokens_used, status,
    created_at, expires_at, used_at
"#;

/// 兑换码冲突时的最大重试次数
const MAX_CODE_ATTEMPTS: usize = 5;

pub struct RewardRepository {
    pool: PgPool,
}

impl RewardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 锁定奖励行（FOR UPDATE），防止并发兑换超卖
    pub async fn lock_reward_in_tx(conn: &mut PgConnection, id: Uuid) -> Result<Option<Reward>> {
        let sql = format!(
            "SELECT {} FROM loyalty_rewards WHERE id = $1 FOR UPDATE",
            REWARD_COLUMNS
        );
        let reward = sqlx::query_as::<_, Reward>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(reward)
    }

    /// 生成库中不存在的兑换码
    pub async fn unique_code_in_tx(conn: &mut PgConnection) -> Result<String> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_redemption_code();
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM loyalty_redemptions WHERE code = $1)",
            )
            .bind(&code)
            .fetch_one(&mut *conn)
            .await?;
            if !taken {
                return Ok(code);
            }
        }
        Err(LoyaltyError::Internal("无法生成唯一兑换码".to_string()))
    }

    pub async fn insert_redemption_in_tx(
        conn: &mut PgConnection,
        redemption: &Redemption,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loyalty_redemptions (id, program_id, customer_id, reward_id, code,
                                             tokens_used, status, created_at, expires_at, used_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(redemption.id)
        .bind(redemption.program_id)
        .bind(redemption.customer_id)
        .bind(redemption.reward_id)
        .bind(&redemption.code)
        .bind(redemption.tokens_used)
        .bind(redemption.status)
        .bind(redemption.created_at)
        .bind(redemption.expires_at)
        .bind(redemption.used_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn update_redemption_status_in_tx(
        conn: &mut PgConnection,
        redemption: &Redemption,
    ) -> Result<()> {
        sqlx::query("UPDATE loyalty_redemptions SET status = $2, used_at = $3 WHERE id = $1")
            .bind(redemption.id)
            .bind(redemption.status)
            .bind(redemption.used_at)
            .execute(conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RewardRepositoryTrait for RewardRepository {
    async fn create_reward(&self, reward: &Reward) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loyalty_rewards (id, program_id, name, description, reward_type,
                                         tokens_required, stock_limit, stock_used, valid_days,
                                         is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(reward.id)
        .bind(reward.program_id)
        .bind(&reward.name)
        .bind(&reward.description)
        .bind(reward.reward_type)
        .bind(reward.tokens_required)
        .bind(reward.stock_limit)
        .bind(reward.stock_used)
        .bind(reward.valid_days)
        .bind(reward.is_active)
        .bind(reward.created_at)
        .bind(reward.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_reward(&self, id: Uuid) -> Result<Option<Reward>> {
        let sql = format!("SELECT {} FROM loyalty_rewards WHERE id = $1", REWARD_COLUMNS);
        let reward = sqlx::query_as::<_, Reward>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(reward)
    }

    async fn set_reward_active(
        &self,
        id: Uuid,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE loyalty_rewards SET is_active = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(active)
                .bind(now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_active_rewards(&self, program_id: Uuid) -> Result<Vec<Reward>> {
        let sql = format!(
            "SELECT {} FROM loyalty_rewards \
             WHERE program_id = $1 AND is_active ORDER BY tokens_required, created_at",
            REWARD_COLUMNS
        );
        let rewards = sqlx::query_as::<_, Reward>(&sql)
            .bind(program_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rewards)
    }

    async fn redeem(&self, cmd: RedeemCommand, ctx: &LedgerContext) -> Result<RedemptionReceipt> {
        let mut tx = self.pool.begin().await?;

        // 1. 锁奖励并校验启用与库存
        let reward = Self::lock_reward_in_tx(&mut tx, cmd.reward_id)
            .await?
            .filter(|r| r.program_id == cmd.program_id)
            .ok_or_else(|| LoyaltyError::not_found("reward", cmd.reward_id))?;
        reward.check_available()?;

        // 2. 扣积分（锁客户余额，余额不足整体回滚）
        let redemption_id = Uuid::now_v7();
        let spend = NewTransaction::new(
            cmd.program_id,
            cmd.customer_id,
            -reward.tokens_required,
            TransactionType::Spend,
            format!("Redeemed {}", reward.name),
        )
        .with_reference(ReferenceType::Redemption, redemption_id);
        let outcome = LedgerRepository::append_in_tx(
            &mut tx,
            cmd.program_id,
            cmd.customer_id,
            Some(spend),
            AppendGuard::RequireBalance,
            ctx,
        )
        .await?;

        // 3. 占用库存
        sqlx::query(
            "UPDATE loyalty_rewards SET stock_used = stock_used + 1, updated_at = $2 WHERE id = $1",
        )
        .bind(reward.id)
        .bind(ctx.now)
        .execute(&mut *tx)
        .await?;

        // 4. 生成兑换码并写兑换记录
        let code = Self::unique_code_in_tx(&mut tx).await?;
        let redemption = Redemption {
            id: redemption_id,
            program_id: cmd.program_id,
            customer_id: cmd.customer_id,
            reward_id: reward.id,
            code,
            tokens_used: reward.tokens_required,
            status: RedemptionStatus::Pending,
            created_at: ctx.now,
            expires_at: reward.expires_at(ctx.now),
            used_at: None,
        };
        Self::insert_redemption_in_tx(&mut tx, &redemption).await?;

        tx.commit().await?;

        Ok(RedemptionReceipt {
            redemption,
            balance_after: outcome.balance.current_balance,
        })
    }

    async fn get_redemption_by_code(
        &self,
        program_id: Uuid,
        code: &str,
    ) -> Result<Option<Redemption>> {
        let sql = format!(
            "SELECT {} FROM loyalty_redemptions WHERE program_id = $1 AND code = $2",
            REDEMPTION_COLUMNS
        );
        let redemption = sqlx::query_as::<_, Redemption>(&sql)
            .bind(program_id)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(redemption)
    }

    async fn list_customer_redemptions(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<Redemption>> {
        let sql = format!(
            "SELECT {} FROM loyalty_redemptions \
             WHERE program_id = $1 AND customer_id = $2 ORDER BY created_at DESC",
            REDEMPTION_COLUMNS
        );
        let redemptions = sqlx::query_as::<_, Redemption>(&sql)
            .bind(program_id)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(redemptions)
    }

    async fn mark_redemption_used(
        &self,
        program_id: Uuid,
        redemption_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Redemption> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM loyalty_redemptions WHERE id = $1 AND program_id = $2 FOR UPDATE",
            REDEMPTION_COLUMNS
        );
        let mut redemption = sqlx::query_as::<_, Redemption>(&sql)
            .bind(redemption_id)
            .bind(program_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LoyaltyError::not_found("redemption", redemption_id))?;

        // 已过期但尚未被扫描的记录：先落库为 expired，再拒绝核销
        if redemption.expire_if_due(now) {
            Self::update_redemption_status_in_tx(&mut tx, &redemption).await?;
            tx.commit().await?;
            return Err(redemption.transition_error(RedemptionStatus::Used));
        }

        redemption.mark_used(now)?;
        Self::update_redemption_status_in_tx(&mut tx, &redemption).await?;
        tx.commit().await?;

        Ok(redemption)
    }

    async fn expire_redemptions(&self, program_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE loyalty_redemptions
            SET status = 'expired'
            WHERE program_id = $1 AND status = 'pending' AND expires_at < $2
            "#,
        )
        .bind(program_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn redemption_stats(
        &self,
        program_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE $2::timestamptz IS NULL OR created_at >= $2) AS created,
                COUNT(*) FILTER (WHERE status = 'used'
                                   AND ($2::timestamptz IS NULL OR used_at >= $2)) AS used
            FROM loyalty_redemptions
            WHERE program_id = $1
            "#,
        )
        .bind(program_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("created"), row.get("used")))
    }
}
