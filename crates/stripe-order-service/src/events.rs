//! Stripe 事件载荷的强类型定义
//!
//! 台账中保存的是完整事件信封（`{id, type, data: {object}}`），
//! 这里只解析两个处理的事件类型所需的字段，其余字段由 serde 忽略。
//! 已处理类型的载荷结构不符时返回 `MalformedPayload`，不做尽力而为的字段访问。

use serde::Deserialize;
use serde_json::Value;

use crate::error::{OrderSyncError, Result};

pub const CUSTOMER_CREATED: &str = "customer.created";
pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

/// 邮政地址
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PostalAddress {
    #[serde(default)]
    pub line1: Option<String>,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    /// 省/州
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl PostalAddress {
    /// 所有字段均为空（或仅含空白）
    pub fn is_empty(&self) -> bool {
        [
            &self.line1,
            &self.line2,
            &self.city,
            &self.state,
            &self.postal_code,
            &self.country,
        ]
        .into_iter()
        .all(|field| non_blank(field).is_none())
    }
}

/// customer.created 的 `data.object`
#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl StripeCustomer {
    pub fn email(&self) -> Option<&str> {
        non_blank(&self.email)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// 账单地址
    #[serde(default)]
    pub address: Option<PostalAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShippingDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<PostalAddress>,
}

/// 新版 API 将收货信息移到了 `collected_information` 下
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectedInformation {
    #[serde(default)]
    pub shipping_details: Option<ShippingDetails>,
}

/// checkout.session.completed 的 `data.object`
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub shipping_details: Option<ShippingDetails>,
    #[serde(default)]
    pub collected_information: Option<CollectedInformation>,
}

impl CheckoutSession {
    /// 客户邮箱，`customer_details.email` 优先
    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| non_blank(&d.email))
            .or_else(|| non_blank(&self.customer_email))
    }

    pub fn customer_name(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| non_blank(&d.name))
    }

    pub fn phone(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| non_blank(&d.phone))
    }

    fn shipping(&self) -> Option<&ShippingDetails> {
        self.shipping_details.as_ref().or_else(|| {
            self.collected_information
                .as_ref()
                .and_then(|c| c.shipping_details.as_ref())
        })
    }

    /// 收货地址，空地址视为缺失
    pub fn shipping_address(&self) -> Option<&PostalAddress> {
        self.shipping()
            .and_then(|s| s.address.as_ref())
            .filter(|a| !a.is_empty())
    }

    /// 账单地址，空地址视为缺失
    pub fn billing_address(&self) -> Option<&PostalAddress> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.address.as_ref())
            .filter(|a| !a.is_empty())
    }

    /// 订单使用的地址：收货地址优先，其次账单地址
    pub fn delivery_address(&self) -> Option<&PostalAddress> {
        self.shipping_address().or_else(|| self.billing_address())
    }
}

/// 解析后的 Stripe 事件
#[derive(Debug, Clone)]
pub enum StripeEvent {
    CustomerCreated(StripeCustomer),
    CheckoutSessionCompleted(Box<CheckoutSession>),
    /// 不处理的事件类型，记录日志后直接完成
    Unhandled(String),
}

impl StripeEvent {
    /// 按事件类型解析信封中的 `data.object`
    pub fn parse(event_type: &str, payload: &Value) -> Result<Self> {
        match event_type {
            CUSTOMER_CREATED => {
                let customer = data_object(event_type, payload)?;
                Ok(Self::CustomerCreated(customer))
            }
            CHECKOUT_SESSION_COMPLETED => {
                let session = data_object(event_type, payload)?;
                Ok(Self::CheckoutSessionCompleted(Box::new(session)))
            }
            other => Ok(Self::Unhandled(other.to_string())),
        }
    }
}

fn data_object<T: serde::de::DeserializeOwned>(event_type: &str, payload: &Value) -> Result<T> {
    let object = payload
        .pointer("/data/object")
        .filter(|v| v.is_object())
        .ok_or_else(|| OrderSyncError::malformed(event_type, "缺少 data.object"))?;

    T::deserialize(object).map_err(|e| OrderSyncError::malformed(event_type, e))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
