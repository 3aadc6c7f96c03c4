//! 生命周期调度错误类型
//!
//! 个性化与投递失败在调度器内部降级处理，不会冒泡到任务结果；
//! 只有配置错误和积分服务的基础设施错误会让一次运行失败。

use loyalty::{ErrorKind, LoyaltyError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("积分服务错误: {0}")]
    Loyalty(#[from] LoyaltyError),

    #[error("个性化改写失败: {0}")]
    Personalization(String),

    #[error("消息投递失败: 渠道={channel}, 原因={reason}")]
    Delivery { channel: String, reason: String },

    #[error("外部调用超时: {operation} ({timeout_ms}ms)")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("无效的 cron 表达式 '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),
}

impl WorkerError {
    /// 幂等日志拦下的重复发送，调度器按跳过计数
    pub fn is_duplicate_send(&self) -> bool {
        matches!(self, Self::Loyalty(e) if e.kind() == ErrorKind::DuplicateSend)
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let delivery = WorkerError::Delivery {
            channel: "whatsapp".to_string(),
            reason: "网关拒绝".to_string(),
        };
        assert_eq!(
            delivery.to_string(),
            "消息投递失败: 渠道=whatsapp, 原因=网关拒绝"
        );

        let timeout = WorkerError::Timeout {
            operation: "personalize",
            timeout_ms: 3000,
        };
        assert_eq!(timeout.to_string(), "外部调用超时: personalize (3000ms)");
    }

    #[test]
    fn test_loyalty_error_converts() {
        let err: WorkerError = LoyaltyError::Validation("bad".to_string()).into();
        assert!(matches!(err, WorkerError::Loyalty(_)));
        assert!(!err.is_duplicate_send());
    }

    #[test]
    fn test_duplicate_send_is_recognised() {
        let err: WorkerError = LoyaltyError::DuplicateSend {
            customer_id: uuid::Uuid::nil(),
            message_type: "reactivation".to_string(),
        }
        .into();
        assert!(err.is_duplicate_send());
        assert!(!WorkerError::Config("x".to_string()).is_duplicate_send());
    }
}
