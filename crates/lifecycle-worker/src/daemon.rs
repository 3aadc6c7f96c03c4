//! 常驻调度
//!
//! 按 cron 表达式计算下次触发时间并等待，到点后依次执行选定的任务。
//! 单个任务失败只记日志，下一个周期照常触发。

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use loyalty_shared::clock::{Clock, SharedClock};
use tracing::{error, info, warn};

use crate::error::{Result, WorkerError};
use crate::scheduler::{Job, JobReport, LifecycleScheduler};

/// 解析后的 cron 表达式（秒 分 时 日 月 周）
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression).map_err(|e| WorkerError::InvalidSchedule {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// after 之后的第一个触发时间
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// 依次执行任务，返回各任务的统计；失败的任务记为 None
pub async fn run_jobs(
    scheduler: &LifecycleScheduler,
    jobs: &[Job],
    dry_run: bool,
) -> Vec<(Job, Option<JobReport>)> {
    let mut results = Vec::with_capacity(jobs.len());
    for &job in jobs {
        match scheduler.run(job, dry_run).await {
            Ok(report) => results.push((job, Some(report))),
            Err(e) => {
                error!(job = job.name(), error = %e, "调度任务执行失败");
                results.push((job, None));
            }
        }
    }
    results
}

/// 常驻调度器
pub struct LifecycleDaemon {
    scheduler: Arc<LifecycleScheduler>,
    schedule: CronSchedule,
    clock: SharedClock,
    jobs: Vec<Job>,
    dry_run: bool,
}

impl LifecycleDaemon {
    pub fn new(scheduler: Arc<LifecycleScheduler>, schedule: CronSchedule, dry_run: bool) -> Self {
        let clock = scheduler.clock();
        Self {
            scheduler,
            schedule,
            clock,
            jobs: Job::ALL.to_vec(),
            dry_run,
        }
    }

    /// 主循环：直到 shutdown 完成
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(cron = self.schedule.expression(), dry_run = self.dry_run, "生命周期调度已启动");

        loop {
            let now = self.clock.now();
            let Some(next) = self.schedule.next_after(now) else {
                warn!(cron = self.schedule.expression(), "cron 表达式没有后续触发时间，退出");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "等待下次调度");

            tokio::select! {
                _ = &mut shutdown => {
                    info!("收到退出信号，停止调度");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            run_jobs(&self.scheduler, &self.jobs, self.dry_run).await;
        }
    }
}
