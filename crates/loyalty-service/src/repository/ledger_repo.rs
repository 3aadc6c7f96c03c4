//! 积分账本仓储
//!
//! 同一客户的写入通过 `loyalty_balances` 行锁（FOR UPDATE）串行化：
//! 先确保投影行存在，再锁定它，随后在锁内读取全部流水、计算并写回。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use super::customer_repo::CustomerRepository;
use super::ledger_unit::{LedgerWrite, plan_write};
use super::traits::{AppendOutcome, LedgerContext, LedgerRepositoryTrait, LedgerStats};
use crate::error::Result;
use crate::models::{
    ActionType, AppendGuard, Balance, LedgerTransaction, NewTransaction, ReconcileReport, replay,
};

const TRANSACTION_COLUMNS: &str = r#"
    id, program_id, customer_id, amount, transaction_type, description,
    monetary_amount, reference_type, reference_id, action_type, created_at
"#;

const BALANCE_COLUMNS: &str = r#"
    program_id, customer_id, total_earned, total_spent, total_expired, current_balance,
    lifetime_value, tier, last_activity_at, next_expiry_at, updated_at
"#;

pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 确保投影行存在并加行锁，返回锁定前的缓存投影
    pub async fn lock_customer_in_tx(
        conn: &mut PgConnection,
        program_id: Uuid,
        customer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Balance>> {
        let sql = format!(
            "SELECT {} FROM loyalty_balances WHERE program_id = $1 AND customer_id = $2 FOR UPDATE",
            BALANCE_COLUMNS
        );
        let existing = sqlx::query_as::<_, Balance>(&sql)
            .bind(program_id)
            .bind(customer_id)
            .fetch_optional(&mut *conn)
            .await?;
        if existing.is_some() {
            return Ok(existing);
        }

        // 首次写入：插入空投影后再锁，并发插入由主键冲突吸收
        sqlx::query(
            r#"
            INSERT INTO loyalty_balances (program_id, customer_id, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (program_id, customer_id) DO NOTHING
            "#,
        )
        .bind(program_id)
        .bind(customer_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "SELECT 1 FROM loyalty_balances WHERE program_id = $1 AND customer_id = $2 FOR UPDATE",
        )
        .bind(program_id)
        .bind(customer_id)
        .execute(&mut *conn)
        .await?;

        Ok(None)
    }

    /// 在事务中读取客户全部流水（时间升序）
    pub async fn history_in_tx(
        conn: &mut PgConnection,
        program_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<LedgerTransaction>> {
        let sql = format!(
            "SELECT {} FROM loyalty_transactions \
             WHERE program_id = $1 AND customer_id = $2 ORDER BY created_at, id",
            TRANSACTION_COLUMNS
        );
        let txs = sqlx::query_as::<_, LedgerTransaction>(&sql)
            .bind(program_id)
            .bind(customer_id)
            .fetch_all(conn)
            .await?;
        Ok(txs)
    }

    /// 在事务中插入一条流水
    pub async fn insert_transaction_in_tx(
        conn: &mut PgConnection,
        tx: &LedgerTransaction,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loyalty_transactions (id, program_id, customer_id, amount,
                                              transaction_type, description, monetary_amount,
                                              reference_type, reference_id, action_type,
                                              created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(tx.id)
        .bind(tx.program_id)
        .bind(tx.customer_id)
        .bind(tx.amount)
        .bind(tx.transaction_type)
        .bind(&tx.description)
        .bind(tx.monetary_amount)
        .bind(tx.reference_type)
        .bind(tx.reference_id)
        .bind(tx.action_type)
        .bind(tx.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// 在事务中写回投影
    pub async fn save_balance_in_tx(conn: &mut PgConnection, balance: &Balance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loyalty_balances (program_id, customer_id, total_earned, total_spent,
                                          total_expired, current_balance, lifetime_value, tier,
                                          last_activity_at, next_expiry_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (program_id, customer_id) DO UPDATE SET
                total_earned = EXCLUDED.total_earned,
                total_spent = EXCLUDED.total_spent,
                total_expired = EXCLUDED.total_expired,
                current_balance = EXCLUDED.current_balance,
                lifetime_value = EXCLUDED.lifetime_value,
                tier = EXCLUDED.tier,
                last_activity_at = EXCLUDED.last_activity_at,
                next_expiry_at = EXCLUDED.next_expiry_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(balance.program_id)
        .bind(balance.customer_id)
        .bind(balance.total_earned)
        .bind(balance.total_spent)
        .bind(balance.total_expired)
        .bind(balance.current_balance)
        .bind(balance.lifetime_value)
        .bind(balance.tier)
        .bind(balance.last_activity_at)
        .bind(balance.next_expiry_at)
        .bind(balance.updated_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// 完整的记账单元，调用方负责事务的开启与提交
    ///
    /// 兑换流程复用此方法，使扣积分与库存、兑换记录处于同一事务
    pub async fn append_in_tx(
        conn: &mut PgConnection,
        program_id: Uuid,
        customer_id: Uuid,
        new: Option<NewTransaction>,
        guard: AppendGuard,
        ctx: &LedgerContext,
    ) -> Result<AppendOutcome> {
        Self::lock_customer_in_tx(conn, program_id, customer_id, ctx.now).await?;
        let history = Self::history_in_tx(conn, program_id, customer_id).await?;

        let write = plan_write(program_id, customer_id, &history, new, guard, ctx)?;
        Self::persist_in_tx(conn, &write, ctx.now).await?;

        Ok(AppendOutcome {
            expired: write.expired(),
            transaction: write.appended,
            balance: write.balance,
        })
    }

    async fn persist_in_tx(
        conn: &mut PgConnection,
        write: &LedgerWrite,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for tx in write.new_transactions() {
            Self::insert_transaction_in_tx(conn, tx).await?;
        }
        Self::save_balance_in_tx(conn, &write.balance).await?;

        // 系统过期不算客户互动
        if let Some(tx) = &write.appended {
            CustomerRepository::touch_in_tx(conn, tx.customer_id, now).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerRepositoryTrait for LedgerRepository {
    async fn append(
        &self,
        tx: NewTransaction,
        guard: AppendGuard,
        ctx: &LedgerContext,
    ) -> Result<AppendOutcome> {
        let (program_id, customer_id) = (tx.program_id, tx.customer_id);
        let mut db_tx = self.pool.begin().await?;
        let outcome =
            Self::append_in_tx(&mut db_tx, program_id, customer_id, Some(tx), guard, ctx).await?;
        db_tx.commit().await?;
        Ok(outcome)
    }

    async fn apply_expiry(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        ctx: &LedgerContext,
    ) -> Result<AppendOutcome> {
        let mut db_tx = self.pool.begin().await?;
        let outcome = Self::append_in_tx(
            &mut db_tx,
            program_id,
            customer_id,
            None,
            AppendGuard::None,
            ctx,
        )
        .await?;
        db_tx.commit().await?;
        Ok(outcome)
    }

    async fn get_balance(&self, program_id: Uuid, customer_id: Uuid) -> Result<Option<Balance>> {
        let sql = format!(
            "SELECT {} FROM loyalty_balances WHERE program_id = $1 AND customer_id = $2",
            BALANCE_COLUMNS
        );
        let balance = sqlx::query_as::<_, Balance>(&sql)
            .bind(program_id)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(balance)
    }

    async fn list_transactions(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        limit: i64,
    ) -> Result<Vec<LedgerTransaction>> {
        let sql = format!(
            "SELECT {} FROM loyalty_transactions \
             WHERE program_id = $1 AND customer_id = $2 \
             ORDER BY created_at DESC, id DESC LIMIT $3",
            TRANSACTION_COLUMNS
        );
        let txs = sqlx::query_as::<_, LedgerTransaction>(&sql)
            .bind(program_id)
            .bind(customer_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(txs)
    }

    async fn reconcile(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        ctx: &LedgerContext,
    ) -> Result<ReconcileReport> {
        let mut db_tx = self.pool.begin().await?;
        let cached = Self::lock_customer_in_tx(&mut db_tx, program_id, customer_id, ctx.now).await?;
        let history = Self::history_in_tx(&mut db_tx, program_id, customer_id).await?;

        let totals = replay(&history, ctx.expiry_days);
        let replayed = Balance::from_totals(
            program_id,
            customer_id,
            &totals,
            ctx.tiers.classify_totals(&totals),
            ctx.now,
        );
        let drifted = match &cached {
            Some(c) => !c.same_figures(&replayed),
            None => !history.is_empty(),
        };

        // 没有缓存也没有流水时，锁定阶段插入的空行同样是正确投影
        Self::save_balance_in_tx(&mut db_tx, &replayed).await?;
        db_tx.commit().await?;

        if drifted {
            debug!(%program_id, %customer_id, "余额投影与流水重放不一致，已改写");
        }
        Ok(ReconcileReport {
            drifted,
            cached,
            replayed,
        })
    }

    async fn earned_for_action_since(
        &self,
        program_id: Uuid,
        customer_id: Uuid,
        action_type: ActionType,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let earned: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM loyalty_transactions
            WHERE program_id = $1 AND customer_id = $2
              AND transaction_type = 'earn_action'
              AND action_type = $3
              AND ($4::timestamptz IS NULL OR created_at >= $4)
            "#,
        )
        .bind(program_id)
        .bind(customer_id)
        .bind(action_type)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(earned)
    }

    async fn list_customers_due_expiry(
        &self,
        program_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT customer_id
            FROM loyalty_balances
            WHERE program_id = $1 AND next_expiry_at <= $2
            ORDER BY next_expiry_at
            "#,
        )
        .bind(program_id)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn ledger_stats(
        &self,
        program_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<LedgerStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(amount) FILTER (
                    WHERE amount > 0 AND transaction_type <> 'expiration'), 0)::BIGINT
                    AS tokens_issued,
                COALESCE(-SUM(amount) FILTER (
                    WHERE amount < 0 AND transaction_type <> 'expiration'), 0)::BIGINT
                    AS tokens_spent,
                COALESCE(-SUM(amount) FILTER (
                    WHERE transaction_type = 'expiration'), 0)::BIGINT
                    AS tokens_expired,
                COUNT(DISTINCT customer_id) FILTER (
                    WHERE transaction_type <> 'expiration')
                    AS active_customers
            FROM loyalty_transactions
            WHERE program_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
            "#,
        )
        .bind(program_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerStats {
            tokens_issued: row.get("tokens_issued"),
            tokens_spent: row.get("tokens_spent"),
            tokens_expired: row.get("tokens_expired"),
            active_customers: row.get("active_customers"),
        })
    }
}
