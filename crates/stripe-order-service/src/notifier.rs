//! 订单就绪通知
//!
//! 订单组装完成后向调度侧广播 OrderReady。通知是尽力而为的：
//! 发送失败只记录警告，不影响事件的处理结果。
//! 当前实现只写日志，接入实时推送时实现同一 trait 即可。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::models::Order;

/// OrderReady 通知内容
#[derive(Debug, Clone, Serialize)]
pub struct OrderReadyEvent {
    pub order_uuid: Uuid,
    pub public_id: String,
    pub company_uuid: Uuid,
    pub customer_uuid: Uuid,
    pub stripe_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Order> for OrderReadyEvent {
    fn from(order: &Order) -> Self {
        Self {
            order_uuid: order.uuid,
            public_id: order.public_id.clone(),
            company_uuid: order.company_uuid,
            customer_uuid: order.customer_uuid,
            stripe_session_id: order.stripe_session_id.clone(),
            created_at: order.created_at,
        }
    }
}

/// 订单通知发送器
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn order_ready(&self, event: &OrderReadyEvent) -> Result<()>;
}

/// 仅记录日志的通知发送器
pub struct LogOrderNotifier;

#[async_trait]
impl OrderNotifier for LogOrderNotifier {
    async fn order_ready(&self, event: &OrderReadyEvent) -> Result<()> {
        info!(
            order_uuid = %event.order_uuid,
            public_id = %event.public_id,
            company_uuid = %event.company_uuid,
            "OrderReady 通知已发出"
        );
        Ok(())
    }
}
