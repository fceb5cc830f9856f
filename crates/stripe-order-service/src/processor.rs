//! Stripe 事件处理器
//!
//! 两个处理的事件类型：
//! - `customer.created`：在目标租户下确保联系人存在
//! - `checkout.session.completed`：解析租户与客户 -> 地理编码 -> 组装订单
//!
//! 其他事件类型只记录日志。

use std::sync::Arc;

use bridge_shared::error::BridgeError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::assembly::{AssemblyRequest, OrderAssembler};
use crate::error::{OrderSyncError, Result};
use crate::events::{CheckoutSession, StripeCustomer, StripeEvent};
use crate::geocoding::GeocodingAdapter;
use crate::identity::{DEFAULT_CUSTOMER_NAME, IdentityResolutionChain};
use crate::repository::OrderRepositoryTrait;

/// 处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    ContactSynced { contact_uuid: Uuid, created: bool },
    /// 没有邮箱或目标租户不可用
    ContactSkipped,
    OrderCreated { order_uuid: Uuid, company_uuid: Uuid },
    /// 该 Checkout Session 已经产生过订单
    OrderAlreadyExists { session_id: String },
    Ignored { event_type: String },
}

/// Stripe 事件处理器
pub struct StripeEventProcessor {
    identities: Arc<IdentityResolutionChain>,
    geocoder: Arc<GeocodingAdapter>,
    assembler: Arc<OrderAssembler>,
    orders: Arc<dyn OrderRepositoryTrait>,
}

impl StripeEventProcessor {
    pub fn new(
        identities: Arc<IdentityResolutionChain>,
        geocoder: Arc<GeocodingAdapter>,
        assembler: Arc<OrderAssembler>,
        orders: Arc<dyn OrderRepositoryTrait>,
    ) -> Self {
        Self {
            identities,
            geocoder,
            assembler,
            orders,
        }
    }

    /// 解析载荷并路由到对应的处理逻辑
    pub async fn handle(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<HandlerOutcome> {
        match StripeEvent::parse(event_type, payload)? {
            StripeEvent::CustomerCreated(customer) => self.handle_customer_created(&customer).await,
            StripeEvent::CheckoutSessionCompleted(session) => {
                self.handle_checkout_completed(&session).await
            }
            StripeEvent::Unhandled(event_type) => {
                info!(event_type = %event_type, "未处理的事件类型，直接完成");
                Ok(HandlerOutcome::Ignored { event_type })
            }
        }
    }

    async fn handle_customer_created(&self, customer: &StripeCustomer) -> Result<HandlerOutcome> {
        let ensured = self
            .identities
            .ensure_contact(
                customer.email(),
                customer.name.as_deref(),
                customer.phone.as_deref(),
            )
            .await?;

        Ok(match ensured {
            Some(ensured) => HandlerOutcome::ContactSynced {
                contact_uuid: ensured.contact.uuid,
                created: ensured.created,
            },
            None => HandlerOutcome::ContactSkipped,
        })
    }

    async fn handle_checkout_completed(&self, session: &CheckoutSession) -> Result<HandlerOutcome> {
        if let Some(order) = self.orders.find_order_by_session(&session.id).await? {
            info!(
                session_id = %session.id,
                order_uuid = %order.uuid,
                "该 Checkout Session 已有订单，跳过"
            );
            return Ok(HandlerOutcome::OrderAlreadyExists {
                session_id: session.id.clone(),
            });
        }

        let customer = self
            .identities
            .resolve_tenant_and_contact(session.email(), session.customer_name(), session.phone())
            .await?;

        info!(
            session_id = %session.id,
            company_uuid = %customer.company_uuid,
            "开始处理 Checkout Session"
        );

        let address = session.delivery_address();
        let coordinates = self.geocoder.geocode(address).await;
        let name = session.customer_name().unwrap_or(DEFAULT_CUSTOMER_NAME);

        let assembled = self
            .assembler
            .assemble(AssemblyRequest {
                company_uuid: customer.company_uuid,
                customer: &customer.contact,
                name,
                address,
                coordinates,
                session_id: &session.id,
            })
            .await;

        match assembled {
            Ok(assembled) => Ok(HandlerOutcome::OrderCreated {
                order_uuid: assembled.order.uuid,
                company_uuid: customer.company_uuid,
            }),
            // 并发投递时另一方先写入了订单
            Err(OrderSyncError::Shared(BridgeError::AlreadyExists { .. })) => {
                warn!(session_id = %session.id, "订单已被并发创建，跳过");
                Ok(HandlerOutcome::OrderAlreadyExists {
                    session_id: session.id.clone(),
                })
            }
            Err(e) => Err(e),
        }
    }
}
