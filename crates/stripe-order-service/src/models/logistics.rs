//! 物流实体：地点、载荷、货物、订单与途经点
//!
//! 创建顺序固定为 Place -> Payload -> Order，后者依赖前者已持久化的 ID。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{CustomerType, OrderStatus};

/// 生成对外公开 ID，形如 `order_k3j9x2a`
pub fn generate_public_id(prefix: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &random[..7])
}

/// 经纬度坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// (0, 0)，地理编码不可用时的默认坐标
    pub const NULL_ISLAND: Coordinates = Coordinates {
        latitude: 0.0,
        longitude: 0.0,
    };

    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_null_island(&self) -> bool {
        *self == Self::NULL_ISLAND
    }
}

impl Default for Coordinates {
    fn default() -> Self {
        Self::NULL_ISLAND
    }
}

/// 地点
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Place {
    pub uuid: Uuid,
    pub company_uuid: Uuid,
    pub name: String,
    #[sqlx(default)]
    pub street1: Option<String>,
    #[sqlx(default)]
    pub street2: Option<String>,
    #[sqlx(default)]
    pub city: Option<String>,
    #[sqlx(default)]
    pub province: Option<String>,
    #[sqlx(default)]
    pub postal_code: Option<String>,
    #[sqlx(default)]
    pub country: Option<String>,
    #[sqlx(flatten)]
    pub location: Coordinates,
    pub created_at: DateTime<Utc>,
}

/// 新建地点参数，地址字段各自可空
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewPlace {
    pub company_uuid: Uuid,
    pub name: String,
    pub street1: Option<String>,
    pub street2: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub location: Coordinates,
}

/// 载荷：一个订单对应一个载荷，引用取货点与送达点
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payload {
    pub uuid: Uuid,
    pub company_uuid: Uuid,
    pub pickup_uuid: Uuid,
    pub dropoff_uuid: Uuid,
    #[sqlx(rename = "type")]
    pub payload_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayload {
    pub company_uuid: Uuid,
    pub pickup_uuid: Uuid,
    pub dropoff_uuid: Uuid,
    pub payload_type: String,
}

/// 载荷中的货物条目
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PayloadItem {
    pub uuid: Uuid,
    pub company_uuid: Uuid,
    pub payload_uuid: Uuid,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayloadItem {
    pub company_uuid: Uuid,
    pub payload_uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// 配送订单
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub uuid: Uuid,
    pub public_id: String,
    pub company_uuid: Uuid,
    pub customer_uuid: Uuid,
    pub customer_type: CustomerType,
    pub payload_uuid: Uuid,
    #[sqlx(rename = "type")]
    pub order_type: String,
    pub status: OrderStatus,
    /// 来源 Checkout Session，唯一约束保证一个会话只产生一个订单
    #[sqlx(default)]
    pub stripe_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub company_uuid: Uuid,
    pub customer_uuid: Uuid,
    pub customer_type: CustomerType,
    pub payload_uuid: Uuid,
    pub order_type: String,
    pub status: OrderStatus,
    pub stripe_session_id: Option<String>,
}

/// 订单途经点
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Waypoint {
    pub uuid: Uuid,
    pub company_uuid: Uuid,
    pub order_uuid: Uuid,
    pub place_uuid: Uuid,
    /// 访问顺序，取货点为 1，送达点为 2
    pub sequence: i32,
}

/// 途经点，租户与订单 ID 取自同一事务中创建的订单
#[derive(Debug, Clone, PartialEq)]
pub struct NewWaypoint {
    pub place_uuid: Uuid,
    pub sequence: i32,
}
