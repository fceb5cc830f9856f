//! Stripe 订单同步服务
//!
//! 消费摄取方写入台账的 Stripe Webhook 事件，把客户同步为联系人、
//! 把完成的 Checkout Session 转换为配送订单，并在台账中记录每个事件的处理结果。

pub mod assembly;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod geocoding;
pub mod identity;
pub mod models;
pub mod notifier;
pub mod pipeline;
pub mod processor;
pub mod repository;
pub mod tenant;
pub mod worker;
