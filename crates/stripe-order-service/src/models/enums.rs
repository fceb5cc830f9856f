//! 枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 事件处理状态
///
/// 状态只能前进：received -> processing -> completed | failed。
/// 可重试的失败在次数用尽前从 processing 回到 received 等待下次执行，不经过 failed。
/// failed 只能由摄取方重新投递显式重置回 received，
/// 处理器自身永远不会让终态事件重新进入 processing。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum EventStatus {
    /// 已由摄取方写入，等待处理
    #[default]
    Received,
    /// 处理中
    Processing,
    /// 处理成功（包括不需要处理的事件类型）
    Completed,
    /// 处理失败，error_message 记录原因
    Failed,
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// 处理器允许的状态迁移
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Received)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 联系人类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ContactType {
    #[default]
    Customer,
    Contact,
}

/// 订单客户的实体类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum CustomerType {
    #[default]
    Contact,
    User,
}

/// 订单状态
///
/// 本服务只创建订单，后续流转由调度系统负责
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Created,
    Dispatched,
    Completed,
    Canceled,
}
