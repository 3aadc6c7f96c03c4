//! Prometheus 指标模块
//!
//! 基于 metrics crate 记录业务指标，由 metrics-exporter-prometheus 在独立端口暴露 `/metrics`。
//! 未安装导出器时所有记录函数都是空操作。

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use super::ObservabilityConfig;

/// 安装 Prometheus 导出器并注册指标描述
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    register_common_metrics(&config.service_name);
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// 注册预定义的业务指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "loyalty_ledger_transactions_total",
        "Total number of ledger transactions appended"
    );
    metrics::describe_counter!("loyalty_redemptions_total", "Total number of redemptions");
    metrics::describe_counter!(
        "loyalty_memberships_total",
        "Total number of membership lifecycle transitions"
    );
    metrics::describe_counter!(
        "loyalty_notifications_total",
        "Total number of lifecycle notifications by outcome"
    );
    metrics::describe_histogram!(
        "loyalty_job_duration_seconds",
        "Scheduler job duration in seconds"
    );
    metrics::describe_gauge!(
        "loyalty_worker_last_run_timestamp",
        "Unix timestamp of the last worker run"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录账本流水写入
#[inline]
pub fn record_ledger_transaction(transaction_type: &str) {
    metrics::counter!(
        "loyalty_ledger_transactions_total",
        "type" => transaction_type.to_string()
    )
    .increment(1);
}

/// 记录兑换结果
#[inline]
pub fn record_redemption(status: &str) {
    metrics::counter!("loyalty_redemptions_total", "status" => status.to_string()).increment(1);
}

/// 记录会员状态变更
#[inline]
pub fn record_membership(action: &str) {
    metrics::counter!("loyalty_memberships_total", "action" => action.to_string()).increment(1);
}

/// 记录生命周期消息处理结果
#[inline]
pub fn record_notification(kind: &str, outcome: &str) {
    metrics::counter!(
        "loyalty_notifications_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录调度任务耗时
#[inline]
pub fn record_job_duration(job: &str, duration_secs: f64) {
    metrics::histogram!("loyalty_job_duration_seconds", "job" => job.to_string())
        .record(duration_secs);
}

/// 记录 Worker 最近一次运行时间，供告警判断 Worker 是否存活
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("loyalty_worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}
