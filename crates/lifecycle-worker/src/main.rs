//! 生命周期消息调度 Worker
//!
//! `run-once` 执行一次后退出，`daemon` 按 cron 常驻。
//! 默认任务依次为到期扫描、续费提醒、沉睡召回。

use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use lifecycle_worker::cli::{Cli, Commands};
use lifecycle_worker::daemon::{CronSchedule, LifecycleDaemon, run_jobs};
use lifecycle_worker::LifecycleScheduler;
use loyalty::{LoyaltyApi, MemoryStore, TierClassifier};
use loyalty_shared::clock::{SharedClock, SystemClock};
use loyalty_shared::config::AppConfig;
use loyalty_shared::database::Database;
use loyalty_shared::observability;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load("lifecycle-worker")?;
    config.validate()?;
    let _guard = observability::init(
        &config
            .observability
            .clone()
            .with_service_name(&config.service_name),
    )?;
    info!(environment = %config.environment, "Starting lifecycle-worker...");

    let clock: SharedClock = Arc::new(SystemClock);
    let tiers = TierClassifier::new(&config.tiers);
    let (api, db) = if cli.memory {
        warn!("使用内存存储，数据不会持久化");
        (
            LoyaltyApi::in_memory(Arc::new(MemoryStore::new()), clock, tiers),
            None,
        )
    } else {
        // run_migrations 开启时 connect 内部已执行迁移
        let db = Database::connect(&config.database).await?;
        (LoyaltyApi::postgres(db.pool().clone(), clock, tiers), Some(db))
    };

    let scheduler = Arc::new(LifecycleScheduler::from_config(api, &config.lifecycle)?);

    let outcome = match cli.command {
        Commands::RunOnce { job, dry_run } => {
            let results = run_jobs(&scheduler, &job.jobs(), dry_run).await;
            let summary: serde_json::Map<_, _> = results
                .iter()
                .map(|(job, report)| (job.name().to_string(), serde_json::json!(report)))
                .collect();
            println!("{}", serde_json::Value::Object(summary));

            let failed: Vec<_> = results
                .iter()
                .filter(|(_, report)| report.is_none())
                .map(|(job, _)| job.name())
                .collect();
            if failed.is_empty() {
                Ok(())
            } else {
                Err(failed)
            }
        }
        Commands::Daemon { cron, dry_run } => {
            let expression = cron.unwrap_or_else(|| config.lifecycle.cron.clone());
            let schedule = CronSchedule::parse(&expression)?;
            LifecycleDaemon::new(scheduler.clone(), schedule, dry_run)
                .run_until(shutdown_signal())
                .await;
            Ok(())
        }
    };

    if let Some(db) = db {
        db.close().await;
    }
    if let Err(failed) = outcome {
        bail!("调度任务失败: {}", failed.join(", "));
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
}
