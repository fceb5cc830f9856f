//! 订单组装
//!
//! 创建顺序固定：送达地点 -> 取货地点 -> 载荷 -> 货物条目 -> 订单与途经点。
//! 后一步依赖前一步已持久化的 ID。订单与途经点原子写入；
//! 之前的步骤部分失败时不做补偿删除，已创建的地点/载荷会成为孤立记录，由重试重新组装。

use std::sync::Arc;

use bridge_shared::observability::metrics;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::events::PostalAddress;
use crate::models::{
    Contact, Coordinates, CustomerType, NewOrder, NewPayload, NewPayloadItem, NewPlace,
    NewWaypoint, Order, OrderStatus, Payload, PayloadItem, Place, Waypoint,
};
use crate::notifier::{OrderNotifier, OrderReadyEvent};
use crate::repository::{OrderRepositoryTrait, PlaceRepositoryTrait};

/// 名称包含这些关键字的地点优先作为取货点
pub const PICKUP_KEYWORDS: [&str; 2] = ["Store", "Warehouse"];
/// 租户没有任何地点时创建的取货点名称
pub const DEFAULT_PICKUP_NAME: &str = "Default Store";
pub const DEFAULT_PAYLOAD_TYPE: &str = "default";
pub const DEFAULT_ORDER_TYPE: &str = "default";
pub const PLACEHOLDER_ITEM_NAME: &str = "Stripe Order Item";
pub const PLACEHOLDER_ITEM_DESCRIPTION: &str = "Order from Stripe Checkout";

/// 组装输入
#[derive(Debug, Clone)]
pub struct AssemblyRequest<'a> {
    pub company_uuid: Uuid,
    pub customer: &'a Contact,
    /// 送达地点名称
    pub name: &'a str,
    pub address: Option<&'a PostalAddress>,
    pub coordinates: Coordinates,
    pub session_id: &'a str,
}

/// 组装结果
#[derive(Debug, Clone)]
pub struct AssembledOrder {
    pub dropoff: Place,
    pub pickup: Place,
    pub payload: Payload,
    pub item: PayloadItem,
    pub order: Order,
    pub waypoints: Vec<Waypoint>,
}

/// 订单组装器
pub struct OrderAssembler {
    places: Arc<dyn PlaceRepositoryTrait>,
    orders: Arc<dyn OrderRepositoryTrait>,
    notifier: Arc<dyn OrderNotifier>,
}

impl OrderAssembler {
    pub fn new(
        places: Arc<dyn PlaceRepositoryTrait>,
        orders: Arc<dyn OrderRepositoryTrait>,
        notifier: Arc<dyn OrderNotifier>,
    ) -> Self {
        Self {
            places,
            orders,
            notifier,
        }
    }

    pub async fn assemble(&self, req: AssemblyRequest<'_>) -> Result<AssembledOrder> {
        let company_uuid = req.company_uuid;

        // 1. 送达地点
        let dropoff = self.places.create_place(&dropoff_place(&req)).await?;
        debug!(place_uuid = %dropoff.uuid, "送达地点已创建");

        // 2. 取货地点
        let pickup = self.resolve_pickup(company_uuid, dropoff.uuid).await?;

        // 3. 载荷
        let payload = self
            .orders
            .create_payload(&NewPayload {
                company_uuid,
                pickup_uuid: pickup.uuid,
                dropoff_uuid: dropoff.uuid,
                payload_type: DEFAULT_PAYLOAD_TYPE.to_string(),
            })
            .await?;

        // 4. 货物条目
        let item = self
            .orders
            .create_payload_item(&NewPayloadItem {
                company_uuid,
                payload_uuid: payload.uuid,
                name: PLACEHOLDER_ITEM_NAME.to_string(),
                description: Some(PLACEHOLDER_ITEM_DESCRIPTION.to_string()),
            })
            .await?;

        // 5. 订单与途经点：取货在前，送达在后
        let stops = [
            NewWaypoint {
                place_uuid: pickup.uuid,
                sequence: 1,
            },
            NewWaypoint {
                place_uuid: dropoff.uuid,
                sequence: 2,
            },
        ];
        let (order, waypoints) = self
            .orders
            .create_order(
                &NewOrder {
                    company_uuid,
                    customer_uuid: req.customer.uuid,
                    customer_type: CustomerType::Contact,
                    payload_uuid: payload.uuid,
                    order_type: DEFAULT_ORDER_TYPE.to_string(),
                    status: OrderStatus::Created,
                    stripe_session_id: Some(req.session_id.to_string()),
                },
                &stops,
            )
            .await?;
        metrics::record_order_created();

        info!(
            order_uuid = %order.uuid,
            public_id = %order.public_id,
            company_uuid = %company_uuid,
            session_id = %req.session_id,
            "订单创建成功"
        );

        self.notify(&order).await;

        Ok(AssembledOrder {
            dropoff,
            pickup,
            payload,
            item,
            order,
            waypoints,
        })
    }

    /// 取货地点：关键字匹配 -> 最早的地点 -> 新建默认门店
    async fn resolve_pickup(&self, company_uuid: Uuid, dropoff_uuid: Uuid) -> Result<Place> {
        let keywords: Vec<String> = PICKUP_KEYWORDS.iter().map(|k| k.to_string()).collect();

        if let Some(place) = self
            .places
            .find_place_by_keywords(company_uuid, &keywords, dropoff_uuid)
            .await?
        {
            return Ok(place);
        }

        if let Some(place) = self
            .places
            .find_oldest_place(company_uuid, dropoff_uuid)
            .await?
        {
            return Ok(place);
        }

        info!(company_uuid = %company_uuid, "租户没有可用的取货地点，创建默认门店");
        self.places
            .create_place(&NewPlace {
                company_uuid,
                name: DEFAULT_PICKUP_NAME.to_string(),
                location: Coordinates::NULL_ISLAND,
                ..Default::default()
            })
            .await
    }

    async fn notify(&self, order: &Order) {
        if let Err(e) = self.notifier.order_ready(&OrderReadyEvent::from(order)).await {
            warn!(order_uuid = %order.uuid, error = %e, "OrderReady 通知发送失败");
        }
    }
}

fn dropoff_place(req: &AssemblyRequest<'_>) -> NewPlace {
    let field = |value: Option<&Option<String>>| {
        value
            .and_then(|v| v.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let address = req.address;

    NewPlace {
        company_uuid: req.company_uuid,
        name: req.name.to_string(),
        street1: field(address.map(|a| &a.line1)),
        street2: field(address.map(|a| &a.line2)),
        city: field(address.map(|a| &a.city)),
        province: field(address.map(|a| &a.state)),
        postal_code: field(address.map(|a| &a.postal_code)),
        country: field(address.map(|a| &a.country)),
        location: req.coordinates,
    }
}
