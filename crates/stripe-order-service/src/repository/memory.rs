//! 内存仓储
//!
//! 使用 DashMap 实现全部仓储接口，用于单元测试、集成测试与本地开发。
//! 与 Postgres 实现保持相同的原子性约定：状态迁移通过条目锁完成，
//! 联系人与订单的唯一性通过索引表的 entry API 保证。
//! 支持按写入点注入故障，用于验证失败路径。

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use super::traits::{
    CompanyRepositoryTrait, EventLedgerRepositoryTrait, IdentityRepositoryTrait,
    OrderRepositoryTrait, PlaceRepositoryTrait,
};
use bridge_shared::error::BridgeError;

use crate::error::Result;
use crate::models::{
    BeginOutcome, BufferOutcome, Company, Contact, EnsuredContact, EventRecord, EventStatus,
    NewContact, NewOrder, NewPayload, NewPayloadItem, NewPlace, NewWaypoint, Order, Payload,
    PayloadItem, Place, User, Waypoint, generate_public_id,
};

/// 可注入故障的写入点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    CreateContact,
    CreatePlace,
    CreatePayload,
    CreateOrder,
    CreateWaypoint,
}

/// 内存存储
///
/// Clone 共享同一份数据，便于在测试中一边驱动管道一边检查结果
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    event_seq: AtomicI64,
    events: DashMap<String, EventRecord>,
    companies: DashMap<Uuid, Company>,
    users: DashMap<Uuid, User>,
    contacts: DashMap<Uuid, Contact>,
    /// (company_uuid, email) -> contact uuid
    contact_emails: DashMap<(Uuid, String), Uuid>,
    places: DashMap<Uuid, Place>,
    payloads: DashMap<Uuid, Payload>,
    payload_items: DashMap<Uuid, PayloadItem>,
    orders: DashMap<Uuid, Order>,
    /// stripe_session_id -> order uuid
    order_sessions: DashMap<String, Uuid>,
    waypoints: DashMap<Uuid, Waypoint>,
    faults: DashSet<FaultPoint>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== 测试数据准备 ====================

    pub fn insert_company(&self, company: Company) {
        self.inner.companies.insert(company.uuid, company);
    }

    /// 创建租户，created_at 决定自然顺序
    pub fn seed_company(&self, name: &str, created_at: DateTime<Utc>) -> Company {
        let uuid = Uuid::new_v4();
        let company = Company {
            uuid,
            public_id: Some(generate_public_id("company")),
            name: name.to_string(),
            created_at,
        };
        self.insert_company(company.clone());
        company
    }

    pub fn insert_user(&self, user: User) {
        self.inner.users.insert(user.uuid, user);
    }

    pub fn seed_user(&self, email: &str, company_uuid: Option<Uuid>) -> User {
        let user = User {
            uuid: Uuid::new_v4(),
            email: email.to_string(),
            name: "Platform User".to_string(),
            phone: None,
            company_uuid,
            created_at: Utc::now(),
        };
        self.insert_user(user.clone());
        user
    }

    pub fn insert_contact(&self, contact: Contact) {
        if let Some(email) = &contact.email {
            self.inner
                .contact_emails
                .insert((contact.company_uuid, email.clone()), contact.uuid);
        }
        self.inner.contacts.insert(contact.uuid, contact);
    }

    pub fn insert_place(&self, place: Place) {
        self.inner.places.insert(place.uuid, place);
    }

    // ==================== 故障注入 ====================

    pub fn inject_fault(&self, point: FaultPoint) {
        self.inner.faults.insert(point);
    }

    pub fn clear_faults(&self) {
        self.inner.faults.clear();
    }

    fn check_fault(&self, point: FaultPoint) -> Result<()> {
        if self.inner.faults.contains(&point) {
            return Err(BridgeError::Database(sqlx::Error::Protocol(format!(
                "injected fault at {point:?}"
            )))
            .into());
        }
        Ok(())
    }

    // ==================== 查询辅助 ====================

    pub fn event(&self, event_id: &str) -> Option<EventRecord> {
        self.inner.events.get(event_id).map(|e| e.clone())
    }

    pub fn contacts(&self) -> Vec<Contact> {
        sorted_by_created(&self.inner.contacts, |c| (c.created_at, c.uuid))
    }

    pub fn places(&self) -> Vec<Place> {
        sorted_by_created(&self.inner.places, |p| (p.created_at, p.uuid))
    }

    pub fn payloads(&self) -> Vec<Payload> {
        sorted_by_created(&self.inner.payloads, |p| (p.created_at, p.uuid))
    }

    pub fn payload_items(&self) -> Vec<PayloadItem> {
        sorted_by_created(&self.inner.payload_items, |i| (i.created_at, i.uuid))
    }

    pub fn orders(&self) -> Vec<Order> {
        sorted_by_created(&self.inner.orders, |o| (o.created_at, o.uuid))
    }

    pub fn waypoints(&self) -> Vec<Waypoint> {
        let mut waypoints: Vec<Waypoint> =
            self.inner.waypoints.iter().map(|w| w.clone()).collect();
        waypoints.sort_by_key(|w| (w.order_uuid, w.sequence));
        waypoints
    }

    pub fn place(&self, uuid: Uuid) -> Option<Place> {
        self.inner.places.get(&uuid).map(|p| p.clone())
    }

    /// 领域记录总数（不含台账与租户），用于断言"未创建任何记录"
    pub fn domain_record_count(&self) -> usize {
        self.inner.contacts.len()
            + self.inner.places.len()
            + self.inner.payloads.len()
            + self.inner.payload_items.len()
            + self.inner.orders.len()
            + self.inner.waypoints.len()
    }

    fn first_place_where(
        &self,
        company_uuid: Uuid,
        exclude: Uuid,
        predicate: impl Fn(&Place) -> bool,
    ) -> Option<Place> {
        self.inner
            .places
            .iter()
            .filter(|p| p.company_uuid == company_uuid && p.uuid != exclude && predicate(p))
            .map(|p| p.clone())
            .min_by_key(|p| (p.created_at, p.uuid))
    }
}

fn sorted_by_created<T, K, F>(map: &DashMap<Uuid, T>, key: F) -> Vec<T>
where
    T: Clone,
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut values: Vec<T> = map.iter().map(|v| v.value().clone()).collect();
    values.sort_by_key(|v| key(v));
    values
}

// ---------------------------------------------------------------------------
// 事件台账
// ---------------------------------------------------------------------------

#[async_trait]
impl EventLedgerRepositoryTrait for InMemoryStore {
    async fn record_received(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<BufferOutcome> {
        let now = Utc::now();
        match self.inner.events.entry(event_id.to_string()) {
            Entry::Vacant(vacant) => {
                let id = self.inner.event_seq.fetch_add(1, Ordering::SeqCst) + 1;
                vacant.insert(EventRecord {
                    id,
                    event_id: event_id.to_string(),
                    event_type: event_type.to_string(),
                    payload: payload.clone(),
                    status: EventStatus::Received,
                    attempts: 0,
                    error_message: None,
                    processed_at: None,
                    available_at: now,
                    created_at: now,
                    updated_at: now,
                });
                Ok(BufferOutcome::Inserted)
            }
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.status == EventStatus::Failed {
                    record.status = EventStatus::Received;
                    record.available_at = now;
                    record.updated_at = now;
                    Ok(BufferOutcome::Requeued)
                } else {
                    Ok(BufferOutcome::Duplicate(record.status))
                }
            }
        }
    }

    async fn get(&self, event_id: &str) -> Result<Option<EventRecord>> {
        Ok(self.event(event_id))
    }

    async fn begin_processing(&self, event_id: &str) -> Result<BeginOutcome> {
        let Some(mut record) = self.inner.events.get_mut(event_id) else {
            return Ok(BeginOutcome::NotFound);
        };
        if record.status != EventStatus::Received {
            return Ok(BeginOutcome::NotReceived(record.status));
        }
        record.status = EventStatus::Processing;
        record.updated_at = Utc::now();
        Ok(BeginOutcome::Started(record.clone()))
    }

    async fn mark_completed(&self, event_id: &str) -> Result<()> {
        let Some(mut record) = self.inner.events.get_mut(event_id) else {
            return Ok(());
        };
        if record.status == EventStatus::Processing {
            let now = Utc::now();
            record.status = EventStatus::Completed;
            record.error_message = None;
            record.processed_at = Some(now);
            record.updated_at = now;
        }
        Ok(())
    }

    async fn mark_failed(&self, event_id: &str, error_message: &str) -> Result<i32> {
        let Some(mut record) = self.inner.events.get_mut(event_id) else {
            return Ok(0);
        };
        if record.status == EventStatus::Processing {
            record.status = EventStatus::Failed;
            record.error_message = Some(error_message.to_string());
            record.attempts += 1;
            record.updated_at = Utc::now();
        }
        Ok(record.attempts)
    }

    async fn schedule_retry(
        &self,
        event_id: &str,
        error_message: &str,
        available_at: DateTime<Utc>,
    ) -> Result<i32> {
        let Some(mut record) = self.inner.events.get_mut(event_id) else {
            return Ok(0);
        };
        if record.status == EventStatus::Processing {
            record.status = EventStatus::Received;
            record.error_message = Some(error_message.to_string());
            record.attempts += 1;
            record.available_at = available_at;
            record.updated_at = Utc::now();
        }
        Ok(record.attempts)
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<EventRecord>> {
        let mut due: Vec<EventRecord> = self
            .inner
            .events
            .iter()
            .filter(|e| e.status == EventStatus::Received && e.available_at <= now)
            .map(|e| e.clone())
            .collect();
        due.sort_by_key(|e| (e.available_at, e.id));
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }
}

// ---------------------------------------------------------------------------
// 租户
// ---------------------------------------------------------------------------

#[async_trait]
impl CompanyRepositoryTrait for InMemoryStore {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Company>> {
        Ok(self.inner.companies.get(&uuid).map(|c| c.clone()))
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Company>> {
        Ok(self
            .inner
            .companies
            .iter()
            .find(|c| c.public_id.as_deref() == Some(public_id))
            .map(|c| c.clone()))
    }

    async fn first_company(&self) -> Result<Option<Company>> {
        Ok(self
            .inner
            .companies
            .iter()
            .map(|c| c.clone())
            .min_by_key(|c| (c.created_at, c.uuid)))
    }
}

// ---------------------------------------------------------------------------
// 身份
// ---------------------------------------------------------------------------

#[async_trait]
impl IdentityRepositoryTrait for InMemoryStore {
    async fn find_user_in_company(
        &self,
        email: &str,
        company_uuid: Uuid,
    ) -> Result<Option<User>> {
        Ok(self
            .inner
            .users
            .iter()
            .filter(|u| u.email == email && u.company_uuid == Some(company_uuid))
            .map(|u| u.clone())
            .min_by_key(|u| (u.created_at, u.uuid)))
    }

    async fn find_user(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .users
            .iter()
            .filter(|u| u.email == email && u.company_uuid.is_some())
            .map(|u| u.clone())
            .min_by_key(|u| (u.created_at, u.uuid)))
    }

    async fn find_contact_in_company(
        &self,
        email: &str,
        company_uuid: Uuid,
    ) -> Result<Option<Contact>> {
        Ok(self
            .inner
            .contacts
            .iter()
            .filter(|c| c.email.as_deref() == Some(email) && c.company_uuid == company_uuid)
            .map(|c| c.clone())
            .min_by_key(|c| (c.created_at, c.uuid)))
    }

    async fn find_contact(&self, email: &str) -> Result<Option<Contact>> {
        Ok(self
            .inner
            .contacts
            .iter()
            .filter(|c| c.email.as_deref() == Some(email))
            .map(|c| c.clone())
            .min_by_key(|c| (c.created_at, c.uuid)))
    }

    async fn find_or_create_contact(&self, contact: &NewContact) -> Result<EnsuredContact> {
        self.check_fault(FaultPoint::CreateContact)?;

        let build = || Contact {
            uuid: Uuid::new_v4(),
            company_uuid: contact.company_uuid,
            name: contact.name.clone(),
            email: contact.email.clone(),
            phone: contact.phone.clone(),
            contact_type: contact.contact_type,
            created_at: Utc::now(),
        };

        let Some(email) = &contact.email else {
            let created = build();
            self.inner.contacts.insert(created.uuid, created.clone());
            return Ok(EnsuredContact {
                contact: created,
                created: true,
            });
        };

        // 持有索引条目锁期间完成插入，并发调用只会有一方创建
        match self
            .inner
            .contact_emails
            .entry((contact.company_uuid, email.clone()))
        {
            Entry::Occupied(occupied) => {
                let existing = self
                    .inner
                    .contacts
                    .get(occupied.get())
                    .map(|c| c.clone())
                    .ok_or_else(|| BridgeError::not_found("contact", occupied.get().to_string()))?;
                Ok(EnsuredContact {
                    contact: existing,
                    created: false,
                })
            }
            Entry::Vacant(vacant) => {
                let created = build();
                self.inner.contacts.insert(created.uuid, created.clone());
                vacant.insert(created.uuid);
                Ok(EnsuredContact {
                    contact: created,
                    created: true,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 地点
// ---------------------------------------------------------------------------

#[async_trait]
impl PlaceRepositoryTrait for InMemoryStore {
    async fn create_place(&self, place: &NewPlace) -> Result<Place> {
        self.check_fault(FaultPoint::CreatePlace)?;

        let created = Place {
            uuid: Uuid::new_v4(),
            company_uuid: place.company_uuid,
            name: place.name.clone(),
            street1: place.street1.clone(),
            street2: place.street2.clone(),
            city: place.city.clone(),
            province: place.province.clone(),
            postal_code: place.postal_code.clone(),
            country: place.country.clone(),
            location: place.location,
            created_at: Utc::now(),
        };
        self.insert_place(created.clone());
        Ok(created)
    }

    async fn find_place_by_keywords(
        &self,
        company_uuid: Uuid,
        keywords: &[String],
        exclude: Uuid,
    ) -> Result<Option<Place>> {
        let keywords: HashSet<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        Ok(self.first_place_where(company_uuid, exclude, |p| {
            let name = p.name.to_lowercase();
            keywords.iter().any(|k| name.contains(k.as_str()))
        }))
    }

    async fn find_oldest_place(
        &self,
        company_uuid: Uuid,
        exclude: Uuid,
    ) -> Result<Option<Place>> {
        Ok(self.first_place_where(company_uuid, exclude, |_| true))
    }
}

// ---------------------------------------------------------------------------
// 订单
// ---------------------------------------------------------------------------

#[async_trait]
impl OrderRepositoryTrait for InMemoryStore {
    async fn find_order_by_session(&self, session_id: &str) -> Result<Option<Order>> {
        Ok(self
            .inner
            .order_sessions
            .get(session_id)
            .and_then(|uuid| self.inner.orders.get(uuid.value()).map(|o| o.clone())))
    }

    async fn create_payload(&self, payload: &NewPayload) -> Result<Payload> {
        self.check_fault(FaultPoint::CreatePayload)?;

        let created = Payload {
            uuid: Uuid::new_v4(),
            company_uuid: payload.company_uuid,
            pickup_uuid: payload.pickup_uuid,
            dropoff_uuid: payload.dropoff_uuid,
            payload_type: payload.payload_type.clone(),
            created_at: Utc::now(),
        };
        self.inner.payloads.insert(created.uuid, created.clone());
        Ok(created)
    }

    async fn create_payload_item(&self, item: &NewPayloadItem) -> Result<PayloadItem> {
        let created = PayloadItem {
            uuid: Uuid::new_v4(),
            company_uuid: item.company_uuid,
            payload_uuid: item.payload_uuid,
            name: item.name.clone(),
            description: item.description.clone(),
            created_at: Utc::now(),
        };
        self.inner
            .payload_items
            .insert(created.uuid, created.clone());
        Ok(created)
    }

    async fn create_order(
        &self,
        order: &NewOrder,
        waypoints: &[NewWaypoint],
    ) -> Result<(Order, Vec<Waypoint>)> {
        // 故障在任何写入之前检查，与事务回滚的效果一致
        self.check_fault(FaultPoint::CreateOrder)?;
        if !waypoints.is_empty() {
            self.check_fault(FaultPoint::CreateWaypoint)?;
        }

        let created = Order {
            uuid: Uuid::new_v4(),
            public_id: generate_public_id("order"),
            company_uuid: order.company_uuid,
            customer_uuid: order.customer_uuid,
            customer_type: order.customer_type,
            payload_uuid: order.payload_uuid,
            order_type: order.order_type.clone(),
            status: order.status,
            stripe_session_id: order.stripe_session_id.clone(),
            created_at: Utc::now(),
        };
        let stops: Vec<Waypoint> = waypoints
            .iter()
            .map(|w| Waypoint {
                uuid: Uuid::new_v4(),
                company_uuid: created.company_uuid,
                order_uuid: created.uuid,
                place_uuid: w.place_uuid,
                sequence: w.sequence,
            })
            .collect();

        // 会话条目锁住期间写入订单与途经点，并发的同会话创建只有一个成功
        let _session = match &order.stripe_session_id {
            Some(session_id) => match self.inner.order_sessions.entry(session_id.clone()) {
                Entry::Occupied(_) => {
                    return Err(BridgeError::already_exists(
                        "order",
                        "stripe_session_id",
                        session_id.clone(),
                    )
                    .into());
                }
                Entry::Vacant(vacant) => Some(vacant.insert(created.uuid)),
            },
            None => None,
        };

        self.inner.orders.insert(created.uuid, created.clone());
        for stop in &stops {
            self.inner.waypoints.insert(stop.uuid, stop.clone());
        }
        Ok((created, stops))
    }
}
