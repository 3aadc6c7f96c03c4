//! 生命周期消息调度 Worker
//!
//! 每天扫描积分计划，给即将到期的会员发送续费提醒，给长期未到店的客户发送召回消息。
//! 消息由固定变量表的模板渲染，可选经 AI 改写，再写入幂等日志并交给投递渠道。
//! 单个客户失败不影响整批，外部调用失败一律回退到模板原文。

pub mod cli;
pub mod daemon;
pub mod delivery;
pub mod error;
pub mod personalizer;
pub mod scheduler;
pub mod templates;

pub use error::{Result, WorkerError};
pub use scheduler::{Job, JobReport, LifecycleScheduler, SchedulerSettings};
