//! 订单仓储
//!
//! 载荷、货物条目、订单与途经点的写入。订单按 stripe_session_id 唯一，
//! 冲突时返回 AlreadyExists，由调用方视为已完成。
//! 订单与途经点在同一事务中提交，不会出现没有途经点的订单。

use async_trait::async_trait;
use bridge_shared::error::BridgeError;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::OrderRepositoryTrait;
use crate::error::Result;
use crate::models::{
    NewOrder, NewPayload, NewPayloadItem, NewWaypoint, Order, Payload, PayloadItem, Waypoint,
    generate_public_id,
};

const ORDER_COLUMNS: &str = "uuid, public_id, company_uuid, customer_uuid, customer_type, \
                             payload_uuid, type, status, stripe_session_id, created_at";

pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_order_by_session(&self, session_id: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE stripe_session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    pub async fn create_payload(&self, payload: &NewPayload) -> Result<Payload> {
        let created = sqlx::query_as::<_, Payload>(
            r#"
            INSERT INTO payloads (uuid, company_uuid, pickup_uuid, dropoff_uuid, type, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING uuid, company_uuid, pickup_uuid, dropoff_uuid, type, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(payload.company_uuid)
        .bind(payload.pickup_uuid)
        .bind(payload.dropoff_uuid)
        .bind(&payload.payload_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn create_payload_item(&self, item: &NewPayloadItem) -> Result<PayloadItem> {
        let created = sqlx::query_as::<_, PayloadItem>(
            r#"
            INSERT INTO entities (uuid, company_uuid, payload_uuid, name, description, type, created_at)
            VALUES ($1, $2, $3, $4, $5, 'item', NOW())
            RETURNING uuid, company_uuid, payload_uuid, name, description, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(item.company_uuid)
        .bind(item.payload_uuid)
        .bind(&item.name)
        .bind(&item.description)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    /// 在单个事务内创建订单及其途经点
    ///
    /// 任一写入失败时事务回滚，下次重试不会被会话去重误判为已完成
    pub async fn create_order(
        &self,
        order: &NewOrder,
        waypoints: &[NewWaypoint],
    ) -> Result<(Order, Vec<Waypoint>)> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, Order>(&format!(
            r#"
            INSERT INTO orders (uuid, public_id, company_uuid, customer_uuid, customer_type,
                                payload_uuid, type, status, stripe_session_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(generate_public_id("order"))
        .bind(order.company_uuid)
        .bind(order.customer_uuid)
        .bind(order.customer_type)
        .bind(order.payload_uuid)
        .bind(&order.order_type)
        .bind(order.status)
        .bind(&order.stripe_session_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => BridgeError::already_exists(
                "order",
                "stripe_session_id",
                order.stripe_session_id.clone().unwrap_or_default(),
            ),
            other => BridgeError::Database(other),
        })?;

        let mut stops = Vec::with_capacity(waypoints.len());
        for waypoint in waypoints {
            stops.push(Self::create_waypoint_in_tx(&mut tx, &created, waypoint).await?);
        }

        tx.commit().await?;

        Ok((created, stops))
    }

    async fn create_waypoint_in_tx(
        tx: &mut PgConnection,
        order: &Order,
        waypoint: &NewWaypoint,
    ) -> Result<Waypoint> {
        let created = sqlx::query_as::<_, Waypoint>(
            r#"
            INSERT INTO waypoints (uuid, company_uuid, order_uuid, place_uuid, sequence, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING uuid, company_uuid, order_uuid, place_uuid, sequence
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(order.company_uuid)
        .bind(order.uuid)
        .bind(waypoint.place_uuid)
        .bind(waypoint.sequence)
        .fetch_one(tx)
        .await?;

        Ok(created)
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn find_order_by_session(&self, session_id: &str) -> Result<Option<Order>> {
        self.find_order_by_session(session_id).await
    }

    async fn create_payload(&self, payload: &NewPayload) -> Result<Payload> {
        self.create_payload(payload).await
    }

    async fn create_payload_item(&self, item: &NewPayloadItem) -> Result<PayloadItem> {
        self.create_payload_item(item).await
    }

    async fn create_order(
        &self,
        order: &NewOrder,
        waypoints: &[NewWaypoint],
    ) -> Result<(Order, Vec<Waypoint>)> {
        self.create_order(order, waypoints).await
    }
}
