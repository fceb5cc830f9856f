//! 事件台账记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::EventStatus;

/// 事件台账记录
///
/// 每个入站 Stripe 事件对应一行，是唯一的幂等保护与审计来源
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventRecord {
    pub id: i64,
    /// Stripe 事件 ID（唯一键）
    pub event_id: String,
    pub event_type: String,
    /// 原始事件 JSON
    pub payload: serde_json::Value,
    pub status: EventStatus,
    /// 已失败的处理次数
    pub attempts: i32,
    #[sqlx(default)]
    pub error_message: Option<String>,
    #[sqlx(default)]
    pub processed_at: Option<DateTime<Utc>>,
    /// 最早可被作业运行时领取的时间，重试退避通过推迟该时间实现
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 摄取方写入台账的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferOutcome {
    /// 新事件已写入，需要派发处理
    Inserted,
    /// 之前失败的事件被重新投递，已重置为 received
    Requeued,
    /// 重复投递，保持原状态
    Duplicate(EventStatus),
}

impl BufferOutcome {
    /// 是否需要把事件交给作业运行时
    pub fn should_dispatch(&self) -> bool {
        matches!(self, Self::Inserted | Self::Requeued)
    }
}

/// 抢占事件处理权的结果
#[derive(Debug, Clone)]
pub enum BeginOutcome {
    /// 成功将 received 切换为 processing
    Started(EventRecord),
    /// 事件不处于 received，保持原状态
    NotReceived(EventStatus),
    /// 台账中不存在该事件
    NotFound,
}
