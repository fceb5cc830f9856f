//! 租户与身份实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::ContactType;

/// 租户（公司）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Company {
    /// 规范租户键
    pub uuid: Uuid,
    /// 对外公开标识，形如 `company_xxxx`
    #[sqlx(default)]
    pub public_id: Option<String>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// 平台用户（只读输入）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub uuid: Uuid,
    pub email: String,
    pub name: String,
    #[sqlx(default)]
    pub phone: Option<String>,
    /// 用户可能尚未加入任何公司
    #[sqlx(default)]
    pub company_uuid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// 联系人
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contact {
    pub uuid: Uuid,
    pub company_uuid: Uuid,
    pub name: String,
    #[sqlx(default)]
    pub email: Option<String>,
    #[sqlx(default)]
    pub phone: Option<String>,
    #[sqlx(rename = "type")]
    pub contact_type: ContactType,
    pub created_at: DateTime<Utc>,
}

/// 新建联系人参数
#[derive(Debug, Clone, PartialEq)]
pub struct NewContact {
    pub company_uuid: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub contact_type: ContactType,
}

/// 联系人查找或创建的结果
#[derive(Debug, Clone)]
pub struct EnsuredContact {
    pub contact: Contact,
    /// 本次调用是否新建了联系人
    pub created: bool,
}
