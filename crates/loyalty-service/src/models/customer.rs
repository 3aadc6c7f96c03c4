//! 客户读模型
//!
//! 客户主数据归上层业务系统所有，这里只维护积分与消息需要的字段

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    #[sqlx(default)]
    pub phone: Option<String>,
    /// 最近一次互动时间，账本写入时更新
    #[sqlx(default)]
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(id: Uuid, tenant_id: Uuid, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id,
            name: name.into(),
            phone: None,
            last_interaction_at: None,
            created_at: now,
        }
    }

    /// 判断沉睡时使用的时间：没有互动记录则用建档时间
    pub fn last_seen_at(&self) -> DateTime<Utc> {
        self.last_interaction_at.unwrap_or(self.created_at)
    }

    /// 最后互动距今的整月数（至少为 1）
    pub fn months_inactive(&self, now: DateTime<Utc>) -> u32 {
        use chrono::Datelike;

        let last = self.last_seen_at();
        let mut months = (now.year() - last.year()) * 12 + now.month() as i32 - last.month() as i32;
        if now.day() < last.day() {
            months -= 1;
        }
        months.max(1) as u32
    }
}
