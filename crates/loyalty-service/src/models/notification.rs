//! 生命周期消息幂等日志

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::MessageType;

/// 召回消息的去重键，每个客户终身只有一条
pub const REACTIVATION_DEDUP_KEY: &str = "reactivation";

/// 续费提醒的去重键，同一天只允许一条
pub fn reminder_dedup_key(day: NaiveDate) -> String {
    format!("membership_reminder:{}", day.format("%Y-%m-%d"))
}

/// 按消息类型给出去重键
pub fn dedup_key(message_type: MessageType, day: NaiveDate) -> String {
    match message_type {
        MessageType::Reactivation => REACTIVATION_DEDUP_KEY.to_string(),
        MessageType::MembershipReminder => reminder_dedup_key(day),
    }
}

/// 幂等日志记录
///
/// 写入即表示"已尝试发送"，投递回执不在此处跟踪
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLogEntry {
    pub id: Uuid,
    pub program_id: Uuid,
    pub customer_id: Uuid,
    pub message_type: MessageType,
    pub dedup_key: String,
    /// 最终发送的文本
    pub message: String,
    pub channel: String,
    pub sent_at: DateTime<Utc>,
}

impl NotificationLogEntry {
    pub fn new(
        program_id: Uuid,
        customer_id: Uuid,
        message_type: MessageType,
        message: String,
        channel: &str,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            program_id,
            customer_id,
            message_type,
            dedup_key: dedup_key(message_type, sent_at.date_naive()),
            message,
            channel: channel.to_string(),
            sent_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keys() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(dedup_key(MessageType::Reactivation, day), "reactivation");
        assert_eq!(
            dedup_key(MessageType::MembershipReminder, day),
            "membership_reminder:2025-03-09"
        );
    }

    #[test]
    fn test_entry_uses_send_day_for_key() {
        let sent_at = NaiveDate::from_ymd_opt(2025, 3, 9)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            .and_utc();
        let entry = NotificationLogEntry::new(
            Uuid::nil(),
            Uuid::nil(),
            MessageType::MembershipReminder,
            "hi".to_string(),
            "whatsapp",
            sent_at,
        );
        assert_eq!(entry.dedup_key, "membership_reminder:2025-03-09");
        assert_eq!(entry.channel, "whatsapp");
    }
}
