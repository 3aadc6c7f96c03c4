//! 积分服务错误类型
//!
//! 业务错误按对外的 [`ErrorKind`] 分类归并，系统错误统一归为 `Internal`

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// 积分服务错误类型
#[derive(Debug, Error)]
pub enum LoyaltyError {
    // === 业务错误 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("积分余额不足: 需要 {required}, 可用 {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("奖励库存不足: reward_id={reward_id}")]
    StockExhausted { reward_id: Uuid },

    #[error("状态不允许此操作: {entity} {id} 当前为 {from}, 目标 {to}")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("{entity} 不存在: {id}")]
    NotFound { entity: &'static str, id: String },

    /// 幂等日志已存在记录，调用方按静默跳过处理
    #[error("消息已发送过: customer_id={customer_id}, message_type={message_type}")]
    DuplicateSend {
        customer_id: Uuid,
        message_type: String,
    },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("并发冲突，请重试")]
    ConcurrencyConflict,

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 积分服务 Result 类型别名
pub type Result<T> = std::result::Result<T, LoyaltyError>;

/// 对外暴露的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    InsufficientBalance,
    StockExhausted,
    InvalidStateTransition,
    NotFound,
    DuplicateSend,
    Internal,
}

impl LoyaltyError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        id: impl ToString,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// 归并到对外错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::StockExhausted { .. } => ErrorKind::StockExhausted,
            Self::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateSend { .. } => ErrorKind::DuplicateSend,
            Self::Database(_)
            | Self::Serialization(_)
            | Self::ConcurrencyConflict
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::ConcurrencyConflict)
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        self.kind() != ErrorKind::Internal
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::StockExhausted { .. } => "STOCK_EXHAUSTED",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::DuplicateSend { .. } => "DUPLICATE_SEND",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            LoyaltyError::validation("amount").kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            LoyaltyError::InsufficientBalance {
                required: 100,
                available: 80
            }
            .kind(),
            ErrorKind::InsufficientBalance
        );
        assert_eq!(
            LoyaltyError::invalid_state("redemption", "RD1", "used", "used").kind(),
            ErrorKind::InvalidStateTransition
        );
        assert_eq!(
            LoyaltyError::ConcurrencyConflict.kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(LoyaltyError::ConcurrencyConflict.is_retryable());
        assert!(!LoyaltyError::not_found("reward", Uuid::nil()).is_retryable());
    }

    #[test]
    fn test_error_is_business_error() {
        assert!(
            LoyaltyError::StockExhausted {
                reward_id: Uuid::nil()
            }
            .is_business_error()
        );
        assert!(!LoyaltyError::Internal("boom".to_string()).is_business_error());
    }

    #[test]
    fn test_error_display() {
        let err = LoyaltyError::InsufficientBalance {
            required: 100,
            available: 80,
        };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("80"));
        assert_eq!(err.error_code(), "INSUFFICIENT_BALANCE");
    }
}
