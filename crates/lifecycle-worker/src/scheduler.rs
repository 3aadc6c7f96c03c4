//! 生命周期消息调度
//!
//! 每日任务，均可重复触发：
//! - 到期扫描：会员到期/自动续期、兑换记录过期、积分过期，先于消息任务执行
//! - 续费提醒：计划内 `今天 + membership_reminder_days` 当天到期的有效会员
//! - 沉睡召回：最后互动早于 `今天 - reactivation_months` 的客户，每人终身一次
//!
//! 每个客户是独立的处理单元，单个客户失败只计数并记录日志，不会中断整批。
//! 是否"已发送"只以幂等日志为准：先查日志，再由 `try_record` 的唯一约束兜底，
//! 两个并发运行不会给同一客户发两次。任务结果只是统计信息。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use loyalty::repository::ExpiringMembership;
use loyalty::{Customer, LoyaltyApi, LoyaltyError, MessageType, NotificationLogEntry, Program, Repositories};
use loyalty_shared::clock::{Clock, SharedClock};
use loyalty_shared::config::LifecycleConfig;
use loyalty_shared::observability::metrics;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::delivery::{DeliveryChannel, LoggingChannel, OutboundMessage, deliver_with_timeout};
use crate::error::Result;
use crate::personalizer::PersonalizationStep;
use crate::templates::{TemplateRenderer, TemplateVars};

/// 没有可兑换奖励时的召回文案
pub const GENERIC_OFFER: &str = "Come back soon, we have something special waiting for you.";

/// 调度任务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    Sweeps,
    MembershipReminders,
    Reactivation,
}

impl Job {
    /// 执行顺序：扫描在前，提醒只针对扫描后仍有效的会员
    pub const ALL: [Job; 3] = [Job::Sweeps, Job::MembershipReminders, Job::Reactivation];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sweeps => "sweeps",
            Self::MembershipReminders => "membership_reminders",
            Self::Reactivation => "reactivation",
        }
    }

    /// 任务发送的消息类型，扫描任务不发消息
    pub fn message_type(&self) -> Option<MessageType> {
        match self {
            Self::Sweeps => None,
            Self::MembershipReminders => Some(MessageType::MembershipReminder),
            Self::Reactivation => Some(MessageType::Reactivation),
        }
    }
}

/// 单次任务的统计
///
/// 试运行时 `sent` 表示"本应发送"的条数。
/// 扫描任务中 `processed` 为状态被改写的记录数，`errors` 为失败的扫描数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub processed: u32,
    pub sent: u32,
    pub skipped: u32,
    pub errors: u32,
    pub dry_run: bool,
}

impl JobReport {
    fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    fn record(
        &mut self,
        message_type: MessageType,
        program_id: Uuid,
        customer_id: Uuid,
        outcome: Result<CustomerOutcome>,
    ) {
        let label = match outcome {
            Ok(CustomerOutcome::Sent) => {
                self.sent += 1;
                "sent"
            }
            Ok(CustomerOutcome::DryRun) => {
                self.sent += 1;
                "dry_run"
            }
            Ok(CustomerOutcome::AlreadySent) => {
                self.skipped += 1;
                "skipped"
            }
            // 并发运行中另一方先写入了幂等日志
            Err(e) if e.is_duplicate_send() => {
                self.skipped += 1;
                "skipped"
            }
            Err(e) => {
                self.errors += 1;
                error!(
                    message_type = message_type.as_str(),
                    program_id = %program_id,
                    customer_id = %customer_id,
                    error = %e,
                    "客户消息处理失败，继续处理下一位"
                );
                "error"
            }
        };
        metrics::record_notification(message_type.as_str(), label);
    }
}

/// 单个客户的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CustomerOutcome {
    Sent,
    DryRun,
    /// 幂等日志已有记录
    AlreadySent,
}

/// 调度参数
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub channel: String,
    pub reminder_dedup_days: i64,
    pub delivery_timeout: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self {
            channel: config.channel.clone(),
            reminder_dedup_days: config.reminder_dedup_days,
            delivery_timeout: Duration::from_millis(config.delivery_timeout_ms),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&LifecycleConfig::default())
    }
}

/// 生命周期消息调度器
pub struct LifecycleScheduler {
    api: LoyaltyApi,
    renderer: TemplateRenderer,
    personalization: PersonalizationStep,
    delivery: Arc<dyn DeliveryChannel>,
    settings: SchedulerSettings,
}

impl LifecycleScheduler {
    pub fn new(
        api: LoyaltyApi,
        renderer: TemplateRenderer,
        personalization: PersonalizationStep,
        delivery: Arc<dyn DeliveryChannel>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            api,
            renderer,
            personalization,
            delivery,
            settings,
        }
    }

    /// 按配置组装：内置模板、日志投递渠道、可选的 AI 改写
    pub fn from_config(api: LoyaltyApi, config: &LifecycleConfig) -> Result<Self> {
        let personalization = PersonalizationStep::from_config(&config.personalization)?;
        Ok(Self::new(
            api,
            TemplateRenderer::new(),
            personalization,
            Arc::new(LoggingChannel),
            SchedulerSettings::from_config(config),
        ))
    }

    pub fn clock(&self) -> SharedClock {
        self.api.context().clock.clone()
    }

    fn repos(&self) -> &Repositories {
        &self.api.context().repos
    }

    fn now(&self) -> DateTime<Utc> {
        self.api.context().clock.now()
    }

    fn today(&self) -> NaiveDate {
        self.api.context().clock.today()
    }

    pub async fn run(&self, job: Job, dry_run: bool) -> Result<JobReport> {
        match job {
            Job::Sweeps => self.process_sweeps(dry_run).await,
            Job::MembershipReminders => self.process_expiring_memberships(dry_run).await,
            Job::Reactivation => self.process_inactive_patients(dry_run).await,
        }
    }

    // ==================== 到期扫描 ====================

    /// 对每个启用中的计划执行会员、兑换记录、积分三项到期扫描
    ///
    /// 单项扫描失败计入 errors，继续执行其余扫描；试运行不做任何写入
    #[instrument(skip(self))]
    pub async fn process_sweeps(&self, dry_run: bool) -> Result<JobReport> {
        let started = Instant::now();
        let mut report = JobReport::new(dry_run);

        let programs = self.repos().programs.list_active_programs().await?;
        if dry_run {
            info!(programs = programs.len(), "试运行：跳过到期扫描");
            self.finish(Job::Sweeps, started, &report);
            return Ok(report);
        }

        for program in &programs {
            match self.api.memberships().membership_expiry_sweep(program.id).await {
                Ok(swept) => report.processed += (swept.renewed + swept.expired) as u32,
                Err(e) => {
                    error!(program_id = %program.id, error = %e, "会员到期扫描失败");
                    report.errors += 1;
                }
            }

            match self.api.redemptions().expire_redemptions_sweep(program.id).await {
                Ok(expired) => report.processed += expired as u32,
                Err(e) => {
                    error!(program_id = %program.id, error = %e, "兑换记录过期扫描失败");
                    report.errors += 1;
                }
            }

            match self.api.ledger().expire_tokens_sweep(program.id).await {
                Ok(swept) => {
                    report.processed += swept.customers as u32;
                    report.errors += swept.errors as u32;
                }
                Err(e) => {
                    error!(program_id = %program.id, error = %e, "积分过期扫描失败");
                    report.errors += 1;
                }
            }
        }

        self.finish(Job::Sweeps, started, &report);
        Ok(report)
    }

    // ==================== 续费提醒 ====================

    /// 给即将到期的会员发送续费提醒
    ///
    /// 回看 `reminder_dedup_days` 天内已提醒过的客户跳过
    #[instrument(skip(self))]
    pub async fn process_expiring_memberships(&self, dry_run: bool) -> Result<JobReport> {
        let started = Instant::now();
        let today = self.today();
        let mut report = JobReport::new(dry_run);

        let programs = self.repos().programs.list_active_programs().await?;
        for program in &programs {
            let target = program.reminder_date(today);
            let due = match self
                .repos()
                .memberships
                .list_active_ending_on(program.id, target)
                .await
            {
                Ok(due) => due,
                Err(e) => {
                    error!(program_id = %program.id, error = %e, "查询即将到期会员失败");
                    report.errors += 1;
                    continue;
                }
            };

            debug!(program_id = %program.id, end_date = %target, count = due.len(), "待提醒会员");
            for expiring in &due {
                report.processed += 1;
                let outcome = self.remind(program, expiring, today, dry_run).await;
                report.record(
                    MessageType::MembershipReminder,
                    program.id,
                    expiring.membership.customer_id,
                    outcome,
                );
            }
        }

        self.finish(Job::MembershipReminders, started, &report);
        Ok(report)
    }

    async fn remind(
        &self,
        program: &Program,
        expiring: &ExpiringMembership,
        today: NaiveDate,
        dry_run: bool,
    ) -> Result<CustomerOutcome> {
        let customer_id = expiring.membership.customer_id;
        let lookback = self.now() - chrono::Duration::days(self.settings.reminder_dedup_days);

        let already = self
            .repos()
            .notifications
            .exists(
                program.id,
                customer_id,
                MessageType::MembershipReminder,
                Some(lookback),
            )
            .await?;
        if already {
            debug!(program_id = %program.id, customer_id = %customer_id, "回看窗口内已提醒，跳过");
            return Ok(CustomerOutcome::AlreadySent);
        }

        let destination = self
            .repos()
            .customers
            .get_customer(customer_id)
            .await?
            .and_then(|c| c.phone);
        let vars = TemplateVars::membership_reminder(program, expiring, today);

        self.dispatch(
            program,
            customer_id,
            MessageType::MembershipReminder,
            &vars,
            destination,
            Some(lookback),
            dry_run,
        )
        .await
    }

    // ==================== 沉睡召回 ====================

    /// 召回长期未互动的客户，每位客户终身只发一次
    #[instrument(skip(self))]
    pub async fn process_inactive_patients(&self, dry_run: bool) -> Result<JobReport> {
        let started = Instant::now();
        let today = self.today();
        let mut report = JobReport::new(dry_run);

        let programs = self.repos().programs.list_active_programs().await?;
        for program in &programs {
            let cutoff = program
                .reactivation_cutoff(today)
                .and_time(NaiveTime::MIN)
                .and_utc();
            let customers = match self
                .repos()
                .customers
                .list_inactive_customers(program.tenant_id, cutoff)
                .await
            {
                Ok(customers) => customers,
                Err(e) => {
                    error!(program_id = %program.id, error = %e, "查询沉睡客户失败");
                    report.errors += 1;
                    continue;
                }
            };

            debug!(program_id = %program.id, cutoff = %cutoff, count = customers.len(), "待召回客户");
            for customer in &customers {
                report.processed += 1;
                let outcome = self.reactivate(program, customer, dry_run).await;
                report.record(MessageType::Reactivation, program.id, customer.id, outcome);
            }
        }

        self.finish(Job::Reactivation, started, &report);
        Ok(report)
    }

    async fn reactivate(
        &self,
        program: &Program,
        customer: &Customer,
        dry_run: bool,
    ) -> Result<CustomerOutcome> {
        let already = self
            .repos()
            .notifications
            .exists(program.id, customer.id, MessageType::Reactivation, None)
            .await?;
        if already {
            return Ok(CustomerOutcome::AlreadySent);
        }

        let months_inactive = customer.months_inactive(self.now());
        let offer = self.special_offer(program, customer.id).await;
        let vars = TemplateVars::reactivation(program, customer, months_inactive, &offer);

        self.dispatch(
            program,
            customer.id,
            MessageType::Reactivation,
            &vars,
            customer.phone.clone(),
            None,
            dry_run,
        )
        .await
    }

    /// 客户当前余额可兑换的最便宜奖励，没有时使用通用文案
    ///
    /// 查询失败只影响文案，不影响发送
    async fn special_offer(&self, program: &Program, customer_id: Uuid) -> String {
        let offer = async {
            let balance = self.api.ledger().get_balance(program.id, customer_id).await?;
            let reward = self
                .api
                .redemptions()
                .cheapest_affordable_reward(program.id, balance.current_balance)
                .await?;
            Ok::<_, LoyaltyError>(reward.map(|r| (r.name, balance.current_balance)))
        }
        .await;

        match offer {
            Ok(Some((reward_name, balance))) => format!(
                "You have {balance} {currency}, enough for {reward_name} on your next visit.",
                currency = program.currency_name,
            ),
            Ok(None) => GENERIC_OFFER.to_string(),
            Err(e) => {
                warn!(
                    program_id = %program.id,
                    customer_id = %customer_id,
                    error = %e,
                    "查询召回优惠失败，使用通用文案"
                );
                GENERIC_OFFER.to_string()
            }
        }
    }

    // ==================== 发送 ====================

    /// 渲染、个性化、写幂等日志、投递
    ///
    /// 幂等日志写入失败（唯一约束冲突）返回 `DuplicateSend`，由统计按跳过处理。
    /// 投递失败只记日志：日志表记录的是"已尝试发送"。
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        program: &Program,
        customer_id: Uuid,
        message_type: MessageType,
        vars: &TemplateVars,
        destination: Option<String>,
        lookback: Option<DateTime<Utc>>,
        dry_run: bool,
    ) -> Result<CustomerOutcome> {
        let rendered = self.renderer.render(message_type, vars);

        if dry_run {
            info!(
                message_type = message_type.as_str(),
                program_id = %program.id,
                customer_id = %customer_id,
                text = %rendered.text,
                "试运行：消息已渲染，未记录也未发送"
            );
            return Ok(CustomerOutcome::DryRun);
        }

        let personalized = self.personalization.apply(&rendered, &program.tenant_name).await;
        if personalized.is_degraded() {
            metrics::record_notification(message_type.as_str(), "personalization_fallback");
        }

        let entry = NotificationLogEntry::new(
            program.id,
            customer_id,
            message_type,
            personalized.into_text(),
            &self.settings.channel,
            self.now(),
        );
        let recorded = self
            .repos()
            .notifications
            .try_record(&entry, lookback)
            .await?;
        if !recorded {
            debug!(
                message_type = message_type.as_str(),
                customer_id = %customer_id,
                "幂等日志已存在，跳过发送"
            );
            return Err(LoyaltyError::DuplicateSend {
                customer_id,
                message_type: message_type.as_str().to_string(),
            }
            .into());
        }

        let message = OutboundMessage {
            program_id: program.id,
            customer_id,
            message_type,
            channel: entry.channel,
            destination,
            text: entry.message,
        };
        if let Err(e) =
            deliver_with_timeout(self.delivery.as_ref(), &message, self.settings.delivery_timeout)
                .await
        {
            warn!(
                message_type = message_type.as_str(),
                customer_id = %customer_id,
                error = %e,
                "消息投递失败，发送尝试已记录"
            );
            metrics::record_notification(message_type.as_str(), "delivery_failed");
        }

        Ok(CustomerOutcome::Sent)
    }

    fn finish(&self, job: Job, started: Instant, report: &JobReport) {
        metrics::record_job_duration(job.name(), started.elapsed().as_secs_f64());
        metrics::set_worker_last_run(job.name());
        info!(
            job = job.name(),
            processed = report.processed,
            sent = report.sent,
            skipped = report.skipped,
            errors = report.errors,
            dry_run = report.dry_run,
            "调度任务完成"
        );
    }
}
