//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于处理管道依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    BeginOutcome, BufferOutcome, Company, Contact, EnsuredContact, EventRecord, NewContact,
    NewOrder, NewPayload, NewPayloadItem, NewPlace, NewWaypoint, Order, Payload, PayloadItem,
    Place, User, Waypoint,
};

/// 事件台账仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventLedgerRepositoryTrait: Send + Sync {
    // 摄取
    async fn record_received(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<BufferOutcome>;
    async fn get(&self, event_id: &str) -> Result<Option<EventRecord>>;

    // 状态迁移
    async fn begin_processing(&self, event_id: &str) -> Result<BeginOutcome>;
    async fn mark_completed(&self, event_id: &str) -> Result<()>;
    /// 返回累计失败次数
    async fn mark_failed(&self, event_id: &str, error_message: &str) -> Result<i32>;
    /// processing -> received 并推迟到 available_at，返回累计失败次数
    async fn schedule_retry(
        &self,
        event_id: &str,
        error_message: &str,
        available_at: DateTime<Utc>,
    ) -> Result<i32>;

    // 作业运行时
    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<EventRecord>>;
}

/// 租户仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompanyRepositoryTrait: Send + Sync {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Company>>;
    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Company>>;
    /// 按存储自然顺序（创建时间）取第一个租户
    async fn first_company(&self) -> Result<Option<Company>>;
}

/// 身份仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityRepositoryTrait: Send + Sync {
    // 用户（只读）
    async fn find_user_in_company(&self, email: &str, company_uuid: Uuid)
    -> Result<Option<User>>;
    /// 任意租户下邮箱匹配的用户，忽略未加入公司的用户
    async fn find_user(&self, email: &str) -> Result<Option<User>>;

    // 联系人
    async fn find_contact_in_company(
        &self,
        email: &str,
        company_uuid: Uuid,
    ) -> Result<Option<Contact>>;
    async fn find_contact(&self, email: &str) -> Result<Option<Contact>>;
    /// 按 (company_uuid, email) 原子地查找或创建
    async fn find_or_create_contact(&self, contact: &NewContact) -> Result<EnsuredContact>;
}

/// 地点仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaceRepositoryTrait: Send + Sync {
    async fn create_place(&self, place: &NewPlace) -> Result<Place>;
    /// 租户下名称包含任一关键字的最早地点
    async fn find_place_by_keywords(
        &self,
        company_uuid: Uuid,
        keywords: &[String],
        exclude: Uuid,
    ) -> Result<Option<Place>>;
    async fn find_oldest_place(&self, company_uuid: Uuid, exclude: Uuid)
    -> Result<Option<Place>>;
}

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    async fn find_order_by_session(&self, session_id: &str) -> Result<Option<Order>>;
    async fn create_payload(&self, payload: &NewPayload) -> Result<Payload>;
    async fn create_payload_item(&self, item: &NewPayloadItem) -> Result<PayloadItem>;
    /// 订单与途经点原子写入，任一失败都不留下订单。
    /// 同一 stripe_session_id 重复创建时返回 AlreadyExists
    async fn create_order(
        &self,
        order: &NewOrder,
        waypoints: &[NewWaypoint],
    ) -> Result<(Order, Vec<Waypoint>)>;
}
