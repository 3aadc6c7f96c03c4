//! 消息投递渠道
//!
//! 通过 `DeliveryChannel` trait 抽象投递行为。调度器只关心"尝试过发送"，
//! 投递回执与重试不在这里处理。默认的 `LoggingChannel` 仅记录日志，
//! 接入真实网关（WhatsApp、短信）时实现同一 trait 即可。

use std::time::Duration;

use async_trait::async_trait;
use loyalty::MessageType;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, WorkerError};

/// 待投递的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub program_id: Uuid,
    pub customer_id: Uuid,
    pub message_type: MessageType,
    /// 渠道标识，如 "whatsapp"
    pub channel: String,
    pub destination: Option<String>,
    pub text: String,
}

/// 投递回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub channel: String,
    /// 外部渠道返回的消息标识
    pub message_id: Option<String>,
}

/// 投递渠道
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryReceipt>;
}

/// 模拟渠道，只记录日志
pub struct LoggingChannel;

#[async_trait]
impl DeliveryChannel for LoggingChannel {
    async fn deliver(&self, message: &OutboundMessage) -> Result<DeliveryReceipt> {
        let message_id = Uuid::now_v7().to_string();

        info!(
            channel = %message.channel,
            program_id = %message.program_id,
            customer_id = %message.customer_id,
            message_type = message.message_type.as_str(),
            destination = message.destination.as_deref().unwrap_or("-"),
            message_id = %message_id,
            body = %message.text,
            "模拟投递生命周期消息"
        );

        Ok(DeliveryReceipt {
            channel: message.channel.clone(),
            message_id: Some(message_id),
        })
    }
}

/// 带超时的投递，超时按投递失败处理
pub async fn deliver_with_timeout(
    channel: &dyn DeliveryChannel,
    message: &OutboundMessage,
    timeout: Duration,
) -> Result<DeliveryReceipt> {
    match tokio::time::timeout(timeout, channel.deliver(message)).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::Timeout {
            operation: "deliver",
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> OutboundMessage {
        OutboundMessage {
            program_id: Uuid::now_v7(),
            customer_id: Uuid::now_v7(),
            message_type: MessageType::Reactivation,
            channel: "whatsapp".to_string(),
            destination: Some("+5511999990000".to_string()),
            text: "We miss you".to_string(),
        }
    }

    #[tokio::test]
    async fn test_logging_channel_returns_receipt() {
        let receipt = LoggingChannel.deliver(&message()).await.unwrap();
        assert_eq!(receipt.channel, "whatsapp");
        assert!(receipt.message_id.is_some());
    }

    #[tokio::test]
    async fn test_slow_channel_times_out() {
        struct SlowChannel;

        #[async_trait]
        impl DeliveryChannel for SlowChannel {
            async fn deliver(&self, _message: &OutboundMessage) -> Result<DeliveryReceipt> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                unreachable!("投递应已超时")
            }
        }

        let err = deliver_with_timeout(&SlowChannel, &message(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Timeout { operation: "deliver", .. }));
    }

    #[tokio::test]
    async fn test_channel_error_is_passed_through() {
        let mut mock = MockDeliveryChannel::new();
        mock.expect_deliver().times(1).returning(|m| {
            Err(WorkerError::Delivery {
                channel: m.channel.clone(),
                reason: "blocked".to_string(),
            })
        });

        let err = deliver_with_timeout(&mock, &message(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Delivery { .. }));
    }
}
