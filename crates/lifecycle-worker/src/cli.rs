//! 命令行定义
//!
//! `run-once` 立即执行一次任务，适合外部 cron 或运维手工触发；
//! `daemon` 常驻进程，按配置的 cron 表达式每天触发。

use clap::{Parser, Subcommand, ValueEnum};

use crate::scheduler::Job;

/// 生命周期消息调度工具
#[derive(Parser, Debug)]
#[command(name = "lifecycle-worker")]
#[command(version, about = "积分计划生命周期消息调度")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 使用内存存储代替 PostgreSQL（本地调试）
    #[arg(long, global = true)]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 立即执行一次
    RunOnce {
        /// 要执行的任务
        #[arg(short, long, value_enum, default_value_t = JobSelector::All)]
        job: JobSelector,

        /// 只渲染消息，不写日志也不发送
        #[arg(long)]
        dry_run: bool,
    },

    /// 按 cron 表达式常驻运行
    Daemon {
        /// 覆盖配置中的 lifecycle.cron（秒 分 时 日 月 周）
        #[arg(long)]
        cron: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },
}

/// 任务选择
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSelector {
    /// 会员、兑换记录、积分到期扫描
    Sweeps,
    Reminders,
    Reactivation,
    All,
}

impl JobSelector {
    pub fn jobs(&self) -> Vec<Job> {
        match self {
            Self::Sweeps => vec![Job::Sweeps],
            Self::Reminders => vec![Job::MembershipReminders],
            Self::Reactivation => vec![Job::Reactivation],
            Self::All => Job::ALL.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_once_defaults_to_all_jobs() {
        let cli = Cli::try_parse_from(["lifecycle-worker", "run-once"]).unwrap();
        assert!(!cli.memory);
        match cli.command {
            Commands::RunOnce { job, dry_run } => {
                assert_eq!(job, JobSelector::All);
                assert!(!dry_run);
                assert_eq!(job.jobs(), Job::ALL.to_vec());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_once_single_job_dry_run() {
        let cli = Cli::try_parse_from([
            "lifecycle-worker",
            "run-once",
            "--job",
            "reactivation",
            "--dry-run",
            "--memory",
        ])
        .unwrap();
        assert!(cli.memory);
        assert!(matches!(
            cli.command,
            Commands::RunOnce {
                job: JobSelector::Reactivation,
                dry_run: true
            }
        ));
    }

    #[test]
    fn test_daemon_cron_override() {
        let cli =
            Cli::try_parse_from(["lifecycle-worker", "daemon", "--cron", "0 30 8 * * *"]).unwrap();
        match cli.command {
            Commands::Daemon { cron, dry_run } => {
                assert_eq!(cron.as_deref(), Some("0 30 8 * * *"));
                assert!(!dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_sweeps_can_run_alone() {
        let cli = Cli::try_parse_from(["lifecycle-worker", "run-once", "--job", "sweeps"]).unwrap();
        match cli.command {
            Commands::RunOnce { job, .. } => assert_eq!(job.jobs(), vec![Job::Sweeps]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_job_is_rejected() {
        assert!(Cli::try_parse_from(["lifecycle-worker", "run-once", "--job", "birthday"]).is_err());
    }
}
