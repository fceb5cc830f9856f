//! 处理管道端到端测试
//!
//! 使用内存仓储驱动 摄取 -> 派发 -> 处理 -> 台账终态 的完整流程，
//! 外部地理编码服务由 wiremock 模拟。

use std::sync::Arc;
use std::time::Duration as StdDuration;

use bridge_shared::config::{GeocodingConfig, StripeConfig};
use bridge_shared::retry::RetryPolicy;
use bridge_shared::test_utils::{
    CheckoutSessionBuilder, customer_created_event, stripe_event, test_email, test_event_id,
};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use stripe_order_service::dispatcher::{DispatchOutcome, EventDispatcher, SkipReason};
use stripe_order_service::geocoding::GeocodingAdapter;
use stripe_order_service::identity::{DEFAULT_CUSTOMER_NAME, IdentityResolutionChain};
use stripe_order_service::models::{
    BufferOutcome, Contact, ContactType, Coordinates, EventStatus,
};
use stripe_order_service::notifier::LogOrderNotifier;
use stripe_order_service::pipeline::{Repositories, build_dispatcher};
use stripe_order_service::processor::HandlerOutcome;
use stripe_order_service::repository::{FaultPoint, InMemoryStore};
use stripe_order_service::tenant::TenantResolver;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GEOCODE_PATH: &str = "/maps/api/geocode/json";

// ==================== 测试装置 ====================

struct Harness {
    store: InMemoryStore,
    dispatcher: EventDispatcher,
}

impl Harness {
    /// 租户需要先于调度器存在时使用（目标租户标识依赖种子数据）
    fn with_store(
        store: InMemoryStore,
        target: Option<String>,
        geocoder: GeocodingAdapter,
    ) -> Self {
        Self::with_retry(store, target, geocoder, no_retry())
    }

    fn with_retry(
        store: InMemoryStore,
        target: Option<String>,
        geocoder: GeocodingAdapter,
        retry: RetryPolicy,
    ) -> Self {
        let dispatcher = build_dispatcher(
            &Repositories::in_memory(&store),
            &stripe_config(target),
            retry,
            geocoder,
            Arc::new(LogOrderNotifier),
        );
        Self { store, dispatcher }
    }

    /// 预置一个租户并配置为目标租户
    fn with_tenant(geocoder: GeocodingAdapter) -> Self {
        let store = InMemoryStore::new();
        let company = store.seed_company("Acme", Utc::now());
        Self::with_store(store, Some(company.uuid.to_string()), geocoder)
    }

    fn offline(target: Option<String>) -> Self {
        Self::with_store(InMemoryStore::new(), target, GeocodingAdapter::disabled())
    }

    /// 模拟摄取方写入台账后立即派发
    async fn deliver(&self, payload: &Value) -> DispatchOutcome {
        let event_id = payload["id"].as_str().unwrap();
        let event_type = payload["type"].as_str().unwrap();
        self.dispatcher
            .buffer(event_id, event_type, payload)
            .await
            .unwrap();
        self.dispatcher.process(event_id, event_type, payload).await
    }

    fn status(&self, event_id: &str) -> EventStatus {
        self.store.event(event_id).unwrap().status
    }
}

fn stripe_config(target: Option<String>) -> StripeConfig {
    StripeConfig {
        target_company_identifier: target,
        ..Default::default()
    }
}

/// 首次失败即停留在 failed
fn no_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 0,
        ..Default::default()
    }
}

fn geocoder_for(server: &MockServer) -> GeocodingAdapter {
    GeocodingAdapter::from_config(&GeocodingConfig {
        server_api_key: Some("server-key".to_string()),
        api_key: None,
        endpoint: format!("{}{GEOCODE_PATH}", server.uri()),
        timeout_ms: 2_000,
    })
    .unwrap()
}

fn contact(company_uuid: Uuid, email: &str) -> Contact {
    Contact {
        uuid: Uuid::new_v4(),
        company_uuid,
        name: "Existing Contact".to_string(),
        email: Some(email.to_string()),
        phone: None,
        contact_type: ContactType::Customer,
        created_at: Utc::now(),
    }
}

// ==================== 幂等台账 ====================

#[tokio::test]
async fn test_duplicate_delivery_keeps_terminal_status_and_single_order() {
    let harness = Harness::with_tenant(GeocodingAdapter::disabled());

    let event_id = test_event_id();
    let payload = CheckoutSessionBuilder::new().build_event(&event_id);

    let first = harness.deliver(&payload).await;
    assert!(matches!(
        first,
        DispatchOutcome::Completed(HandlerOutcome::OrderCreated { .. })
    ));

    // 重复投递：台账返回 Duplicate，再次派发被跳过
    let buffered = harness
        .dispatcher
        .buffer(&event_id, "checkout.session.completed", &payload)
        .await
        .unwrap();
    assert_eq!(buffered, BufferOutcome::Duplicate(EventStatus::Completed));

    let second = harness
        .dispatcher
        .process(&event_id, "checkout.session.completed", &payload)
        .await;
    assert!(matches!(
        second,
        DispatchOutcome::Skipped(SkipReason::AlreadyTerminal(EventStatus::Completed))
    ));

    assert_eq!(harness.status(&event_id), EventStatus::Completed);
    assert_eq!(harness.store.orders().len(), 1);
}

#[tokio::test]
async fn test_concurrent_dispatch_of_same_event_creates_one_order() {
    let harness = Arc::new(Harness::with_tenant(GeocodingAdapter::disabled()));

    let event_id = test_event_id();
    let payload = CheckoutSessionBuilder::new().build_event(&event_id);
    harness
        .dispatcher
        .buffer(&event_id, "checkout.session.completed", &payload)
        .await
        .unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let harness = harness.clone();
            let event_id = event_id.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                harness
                    .dispatcher
                    .process(&event_id, "checkout.session.completed", &payload)
                    .await
                    .label()
            })
        })
        .collect();

    let mut labels = Vec::new();
    for task in tasks {
        labels.push(task.await.unwrap());
    }

    assert_eq!(labels.iter().filter(|l| **l == "completed").count(), 1);
    assert_eq!(labels.iter().filter(|l| **l == "skipped").count(), 3);
    assert_eq!(harness.store.orders().len(), 1);
    assert_eq!(harness.status(&event_id), EventStatus::Completed);
}

#[tokio::test]
async fn test_distinct_events_for_same_session_create_one_order() {
    let harness = Harness::with_tenant(GeocodingAdapter::disabled());

    let builder = CheckoutSessionBuilder::new().session_id("cs_test_same_session");
    let first = harness.deliver(&builder.build_event(&test_event_id())).await;
    let second = harness.deliver(&builder.build_event(&test_event_id())).await;

    assert!(matches!(
        first,
        DispatchOutcome::Completed(HandlerOutcome::OrderCreated { .. })
    ));
    assert!(matches!(
        second,
        DispatchOutcome::Completed(HandlerOutcome::OrderAlreadyExists { .. })
    ));
    assert_eq!(harness.store.orders().len(), 1);
    assert_eq!(harness.store.places().len(), 2);
}

#[tokio::test]
async fn test_failed_event_redelivery_is_requeued_and_succeeds() {
    let harness = Harness::with_tenant(GeocodingAdapter::disabled());
    harness.store.inject_fault(FaultPoint::CreateOrder);

    let event_id = test_event_id();
    let payload = CheckoutSessionBuilder::new().build_event(&event_id);
    assert!(harness.deliver(&payload).await.is_failed());
    assert_eq!(harness.status(&event_id), EventStatus::Failed);

    harness.store.clear_faults();
    let buffered = harness
        .dispatcher
        .buffer(&event_id, "checkout.session.completed", &payload)
        .await
        .unwrap();
    assert_eq!(buffered, BufferOutcome::Requeued);

    let outcome = harness
        .dispatcher
        .process(&event_id, "checkout.session.completed", &payload)
        .await;
    assert!(matches!(outcome, DispatchOutcome::Completed(_)));

    let record = harness.store.event(&event_id).unwrap();
    assert_eq!(record.status, EventStatus::Completed);
    assert_eq!(record.attempts, 1);
    assert!(record.processed_at.is_some());
    assert_eq!(harness.store.orders().len(), 1);
    // 失败那次留下的联系人被复用
    assert_eq!(harness.store.contacts().len(), 1);
}

// ==================== 解析优先级 ====================

#[tokio::test]
async fn test_user_in_target_tenant_beats_other_user_and_contact() {
    let store = InMemoryStore::new();
    let target = store.seed_company("Target", Utc::now() - Duration::days(1));
    let other = store.seed_company("Other", Utc::now() - Duration::days(2));
    let email = test_email();

    store.seed_user(&email, Some(other.uuid));
    store.seed_user(&email, Some(target.uuid));
    store.insert_contact(contact(target.uuid, &email));

    let repos = Repositories::in_memory(&store);
    let tenants = Arc::new(TenantResolver::new(
        repos.companies.clone(),
        Some(&target.uuid.to_string()),
    ));
    let chain = IdentityResolutionChain::new(tenants, repos.companies, repos.identities);

    let resolved = chain
        .resolve_tenant_and_contact(Some(&email), Some("Ada"), None)
        .await
        .unwrap();

    assert_eq!(resolved.matched_by, "user_in_target_tenant");
    assert_eq!(resolved.company_uuid, target.uuid);
}

#[tokio::test]
async fn test_checkout_attributes_order_to_target_tenant_user() {
    let store = InMemoryStore::new();
    let target = store.seed_company("Target", Utc::now() - Duration::days(1));
    let other = store.seed_company("Other", Utc::now() - Duration::days(2));
    let harness =
        Harness::with_store(store, target.public_id.clone(), GeocodingAdapter::disabled());

    let email = test_email();
    harness.store.seed_user(&email, Some(other.uuid));
    harness.store.seed_user(&email, Some(target.uuid));
    harness.store.insert_contact(contact(target.uuid, &email));

    let event_id = test_event_id();
    let outcome = harness
        .deliver(&CheckoutSessionBuilder::new().email(&email).build_event(&event_id))
        .await;

    let DispatchOutcome::Completed(HandlerOutcome::OrderCreated { company_uuid, .. }) = outcome
    else {
        panic!("expected order creation, got {outcome:?}");
    };
    assert_eq!(company_uuid, target.uuid);

    let order = &harness.store.orders()[0];
    assert_eq!(order.company_uuid, target.uuid);
}

#[tokio::test]
async fn test_missing_target_tenant_falls_back_to_first_tenant() {
    // 配置的租户不在存储中
    let harness = Harness::offline(Some(Uuid::new_v4().to_string()));
    let oldest = harness
        .store
        .seed_company("Oldest", Utc::now() - Duration::days(30));
    harness.store.seed_company("Newer", Utc::now());

    let event_id = test_event_id();
    let outcome = harness
        .deliver(
            &CheckoutSessionBuilder::new()
                .without_name()
                .build_event(&event_id),
        )
        .await;

    assert!(matches!(outcome, DispatchOutcome::Completed(_)));

    let contacts = harness.store.contacts();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].company_uuid, oldest.uuid);
    assert_eq!(contacts[0].name, DEFAULT_CUSTOMER_NAME);
    assert_eq!(harness.store.orders()[0].company_uuid, oldest.uuid);
}

#[tokio::test]
async fn test_no_tenant_fails_checkout_without_records() {
    // 存储中有租户，但没有配置目标租户
    let harness = Harness::offline(None);
    harness.store.seed_company("Acme", Utc::now());

    let event_id = test_event_id();
    let outcome = harness
        .deliver(&CheckoutSessionBuilder::new().build_event(&event_id))
        .await;

    let DispatchOutcome::Failed(failure) = outcome else {
        panic!("expected failure");
    };
    assert!(!failure.retryable);
    assert_eq!(harness.status(&event_id), EventStatus::Failed);
    assert_eq!(harness.store.domain_record_count(), 0);
}

#[tokio::test]
async fn test_unknown_public_id_fails_checkout_without_records() {
    let harness = Harness::offline(Some("company_doesnotexist".to_string()));
    harness.store.seed_company("Acme", Utc::now());

    let event_id = test_event_id();
    let outcome = harness
        .deliver(&CheckoutSessionBuilder::new().build_event(&event_id))
        .await;

    assert!(outcome.is_failed());
    assert_eq!(harness.status(&event_id), EventStatus::Failed);
    assert!(harness.store.orders().is_empty());
    assert_eq!(harness.store.domain_record_count(), 0);
}

// ==================== 地理编码 ====================

#[tokio::test]
async fn test_geocoding_bad_status_degrades_to_null_island() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(GEOCODE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "REQUEST_DENIED",
            "error_message": "The provided API key is invalid.",
            "results": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::with_tenant(geocoder_for(&server));

    let event_id = test_event_id();
    let outcome = harness
        .deliver(&CheckoutSessionBuilder::new().build_event(&event_id))
        .await;
    assert!(matches!(outcome, DispatchOutcome::Completed(_)));

    let order = &harness.store.orders()[0];
    let payload = &harness.store.payloads()[0];
    assert_eq!(order.payload_uuid, payload.uuid);

    let dropoff = harness.store.place(payload.dropoff_uuid).unwrap();
    assert_eq!(dropoff.location, Coordinates::NULL_ISLAND);
    assert_eq!(dropoff.city.as_deref(), Some("Mountain View"));
}

#[tokio::test]
async fn test_geocoding_success_sets_dropoff_coordinates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(GEOCODE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "results": [{"geometry": {"location": {"lat": 37.4224, "lng": -122.0842}}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::with_tenant(geocoder_for(&server));

    let event_id = test_event_id();
    harness
        .deliver(&CheckoutSessionBuilder::new().build_event(&event_id))
        .await;

    let payload = &harness.store.payloads()[0];
    let dropoff = harness.store.place(payload.dropoff_uuid).unwrap();
    assert_eq!(dropoff.location, Coordinates::new(37.4224, -122.0842));
}

#[tokio::test]
async fn test_missing_address_skips_geocoding() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(GEOCODE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::with_tenant(geocoder_for(&server));

    let event_id = test_event_id();
    let outcome = harness
        .deliver(
            &CheckoutSessionBuilder::new()
                .without_shipping()
                .build_event(&event_id),
        )
        .await;
    assert!(matches!(outcome, DispatchOutcome::Completed(_)));

    let payload = &harness.store.payloads()[0];
    let dropoff = harness.store.place(payload.dropoff_uuid).unwrap();
    assert_eq!(dropoff.location, Coordinates::NULL_ISLAND);
    assert!(dropoff.street1.is_none());
    assert_eq!(harness.store.orders().len(), 1);
}

// ==================== 事件类型 ====================

#[tokio::test]
async fn test_unhandled_event_type_completes_without_records() {
    let harness = Harness::with_tenant(GeocodingAdapter::disabled());

    let event_id = test_event_id();
    let outcome = harness
        .deliver(&stripe_event(&event_id, "invoice.paid", json!({"id": "in_1"})))
        .await;

    assert!(matches!(
        outcome,
        DispatchOutcome::Completed(HandlerOutcome::Ignored { .. })
    ));
    assert_eq!(harness.status(&event_id), EventStatus::Completed);
    assert_eq!(harness.store.domain_record_count(), 0);
}

#[tokio::test]
async fn test_customer_created_syncs_contact_into_target_tenant() {
    let store = InMemoryStore::new();
    let company = store.seed_company("Acme", Utc::now());
    let harness =
        Harness::with_store(store, company.public_id.clone(), GeocodingAdapter::disabled());

    let email = test_email();
    let first = harness
        .deliver(&customer_created_event(
            &test_event_id(),
            Some(&email),
            None,
            Some("+15555550100"),
        ))
        .await;
    let second = harness
        .deliver(&customer_created_event(
            &test_event_id(),
            Some(&email),
            Some("Renamed"),
            None,
        ))
        .await;

    assert!(matches!(
        first,
        DispatchOutcome::Completed(HandlerOutcome::ContactSynced { created: true, .. })
    ));
    assert!(matches!(
        second,
        DispatchOutcome::Completed(HandlerOutcome::ContactSynced { created: false, .. })
    ));

    let contacts = harness.store.contacts();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].company_uuid, company.uuid);
    assert_eq!(contacts[0].name, DEFAULT_CUSTOMER_NAME);
    assert_eq!(contacts[0].contact_type, ContactType::Customer);
}

#[tokio::test]
async fn test_customer_created_without_tenant_completes_silently() {
    let harness = Harness::offline(Some("company_missing".to_string()));
    harness.store.seed_company("Acme", Utc::now());

    let event_id = test_event_id();
    let outcome = harness
        .deliver(&customer_created_event(
            &event_id,
            Some("a@example.com"),
            None,
            None,
        ))
        .await;

    assert!(matches!(
        outcome,
        DispatchOutcome::Completed(HandlerOutcome::ContactSkipped)
    ));
    assert_eq!(harness.status(&event_id), EventStatus::Completed);
    assert!(harness.store.contacts().is_empty());
}

#[tokio::test]
async fn test_customer_created_without_email_is_noop() {
    let company_uuid = Uuid::new_v4();
    let harness = Harness::offline(Some(company_uuid.to_string()));

    let event_id = test_event_id();
    let outcome = harness
        .deliver(&customer_created_event(&event_id, None, Some("Ada"), None))
        .await;

    assert!(matches!(
        outcome,
        DispatchOutcome::Completed(HandlerOutcome::ContactSkipped)
    ));
    assert_eq!(harness.store.domain_record_count(), 0);
}

// ==================== 失败路径 ====================

#[tokio::test]
async fn test_storage_failure_marks_failed_and_propagates() {
    let harness = Harness::with_tenant(GeocodingAdapter::disabled());
    harness.store.inject_fault(FaultPoint::CreateOrder);

    let event_id = test_event_id();
    let outcome = harness
        .deliver(&CheckoutSessionBuilder::new().build_event(&event_id))
        .await;

    let record = harness.store.event(&event_id).unwrap();
    assert_eq!(record.status, EventStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert!(!record.error_message.unwrap_or_default().is_empty());

    let DispatchOutcome::Failed(failure) = &outcome else {
        panic!("expected failure");
    };
    assert!(failure.retryable);
    assert!(outcome.into_result().is_err());

    // 订单之前的记录保留，订单没有创建
    assert!(harness.store.orders().is_empty());
    assert_eq!(harness.store.payloads().len(), 1);
}

#[tokio::test]
async fn test_waypoint_failure_does_not_strand_order_on_retry() {
    let harness = Harness::with_tenant(GeocodingAdapter::disabled());
    harness.store.inject_fault(FaultPoint::CreateWaypoint);

    let event_id = test_event_id();
    let payload = CheckoutSessionBuilder::new().build_event(&event_id);
    assert!(harness.deliver(&payload).await.is_failed());
    assert!(harness.store.orders().is_empty());
    assert!(harness.store.waypoints().is_empty());

    harness.store.clear_faults();
    let buffered = harness
        .dispatcher
        .buffer(&event_id, "checkout.session.completed", &payload)
        .await
        .unwrap();
    assert_eq!(buffered, BufferOutcome::Requeued);

    let outcome = harness
        .dispatcher
        .process(&event_id, "checkout.session.completed", &payload)
        .await;
    let DispatchOutcome::Completed(HandlerOutcome::OrderCreated { order_uuid, .. }) = outcome
    else {
        panic!("expected order creation, got {outcome:?}");
    };

    assert_eq!(harness.status(&event_id), EventStatus::Completed);
    assert_eq!(harness.store.orders().len(), 1);
    let waypoints = harness.store.waypoints();
    assert_eq!(waypoints.len(), 2);
    assert!(waypoints.iter().all(|w| w.order_uuid == order_uuid));
}

#[tokio::test]
async fn test_retryable_failure_stays_received_until_retry_succeeds() {
    let store = InMemoryStore::new();
    let company = store.seed_company("Acme", Utc::now());
    let retry = RetryPolicy {
        max_retries: 2,
        initial_delay: StdDuration::ZERO,
        max_delay: StdDuration::ZERO,
        multiplier: 2.0,
    };
    let harness = Harness::with_retry(
        store,
        Some(company.uuid.to_string()),
        GeocodingAdapter::disabled(),
        retry,
    );
    harness.store.inject_fault(FaultPoint::CreateOrder);

    let event_id = test_event_id();
    let payload = CheckoutSessionBuilder::new().build_event(&event_id);
    let outcome = harness.deliver(&payload).await;
    assert_eq!(outcome.label(), "retry_scheduled");

    // 等待重试期间事件从未进入 failed
    let record = harness.store.event(&event_id).unwrap();
    assert_eq!(record.status, EventStatus::Received);
    assert_eq!(record.attempts, 1);
    assert!(record.error_message.is_some());

    harness.store.clear_faults();
    let outcome = harness
        .dispatcher
        .process(&event_id, "checkout.session.completed", &payload)
        .await;
    assert!(matches!(outcome, DispatchOutcome::Completed(_)));

    let record = harness.store.event(&event_id).unwrap();
    assert_eq!(record.status, EventStatus::Completed);
    assert_eq!(record.attempts, 1);
    assert!(record.error_message.is_none());
    assert_eq!(harness.store.orders().len(), 1);
}
