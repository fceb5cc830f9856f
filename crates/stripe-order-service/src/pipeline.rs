//! 处理管道装配
//!
//! 把仓储、租户解析、身份解析链、地理编码、订单组装和处理器组装成派发器。
//! 生产环境使用 Postgres 仓储，测试与本地开发使用内存仓储。

use std::sync::Arc;

use bridge_shared::config::StripeConfig;
use bridge_shared::retry::RetryPolicy;
use sqlx::PgPool;

use crate::assembly::OrderAssembler;
use crate::dispatcher::EventDispatcher;
use crate::geocoding::GeocodingAdapter;
use crate::identity::IdentityResolutionChain;
use crate::notifier::OrderNotifier;
use crate::processor::StripeEventProcessor;
use crate::repository::{
    CompanyRepository, CompanyRepositoryTrait, EventLedgerRepository, EventLedgerRepositoryTrait,
    IdentityRepository, IdentityRepositoryTrait, InMemoryStore, OrderRepository,
    OrderRepositoryTrait, PlaceRepository, PlaceRepositoryTrait,
};
use crate::tenant::TenantResolver;

/// 管道依赖的全部仓储
#[derive(Clone)]
pub struct Repositories {
    pub ledger: Arc<dyn EventLedgerRepositoryTrait>,
    pub companies: Arc<dyn CompanyRepositoryTrait>,
    pub identities: Arc<dyn IdentityRepositoryTrait>,
    pub places: Arc<dyn PlaceRepositoryTrait>,
    pub orders: Arc<dyn OrderRepositoryTrait>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            ledger: Arc::new(EventLedgerRepository::new(pool.clone())),
            companies: Arc::new(CompanyRepository::new(pool.clone())),
            identities: Arc::new(IdentityRepository::new(pool.clone())),
            places: Arc::new(PlaceRepository::new(pool.clone())),
            orders: Arc::new(OrderRepository::new(pool)),
        }
    }

    pub fn in_memory(store: &InMemoryStore) -> Self {
        Self {
            ledger: Arc::new(store.clone()),
            companies: Arc::new(store.clone()),
            identities: Arc::new(store.clone()),
            places: Arc::new(store.clone()),
            orders: Arc::new(store.clone()),
        }
    }
}

/// 组装事件派发器
pub fn build_dispatcher(
    repos: &Repositories,
    stripe: &StripeConfig,
    retry: RetryPolicy,
    geocoder: GeocodingAdapter,
    notifier: Arc<dyn OrderNotifier>,
) -> EventDispatcher {
    let tenants = Arc::new(TenantResolver::new(
        repos.companies.clone(),
        stripe.target_company_identifier.as_deref(),
    ));
    let identities = Arc::new(IdentityResolutionChain::new(
        tenants,
        repos.companies.clone(),
        repos.identities.clone(),
    ));
    let assembler = Arc::new(OrderAssembler::new(
        repos.places.clone(),
        repos.orders.clone(),
        notifier,
    ));
    let processor = Arc::new(StripeEventProcessor::new(
        identities,
        Arc::new(geocoder),
        assembler,
        repos.orders.clone(),
    ));

    EventDispatcher::new(repos.ledger.clone(), processor, retry)
}
