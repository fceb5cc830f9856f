//! 身份仓储
//!
//! 用户只读；联系人的查找或创建依赖 contacts(company_uuid, email) 唯一索引，
//! 并发创建同一邮箱时只有一方插入成功，另一方回读已存在的记录。

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::IdentityRepositoryTrait;
use crate::error::Result;
use crate::models::{Contact, EnsuredContact, NewContact, User};

const USER_COLUMNS: &str = "uuid, email, name, phone, company_uuid, created_at";
const CONTACT_COLUMNS: &str = "uuid, company_uuid, name, email, phone, type, created_at";

pub struct IdentityRepository {
    pool: PgPool,
}

impl IdentityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_user_in_company(
        &self,
        email: &str,
        company_uuid: Uuid,
    ) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE email = $1 AND company_uuid = $2
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(email)
        .bind(company_uuid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_user(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE email = $1 AND company_uuid IS NOT NULL
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn find_contact_in_company(
        &self,
        email: &str,
        company_uuid: Uuid,
    ) -> Result<Option<Contact>> {
        let contact = sqlx::query_as::<_, Contact>(&format!(
            r#"
            SELECT {CONTACT_COLUMNS}
            FROM contacts
            WHERE email = $1 AND company_uuid = $2
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(email)
        .bind(company_uuid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(contact)
    }

    pub async fn find_contact(&self, email: &str) -> Result<Option<Contact>> {
        let contact = sqlx::query_as::<_, Contact>(&format!(
            r#"
            SELECT {CONTACT_COLUMNS}
            FROM contacts
            WHERE email = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(contact)
    }

    /// 查找或创建联系人
    ///
    /// 有邮箱时先 `ON CONFLICT DO NOTHING` 插入，冲突则回读；没有邮箱的联系人直接插入。
    pub async fn find_or_create_contact(&self, contact: &NewContact) -> Result<EnsuredContact> {
        let inserted = sqlx::query_as::<_, Contact>(&format!(
            r#"
            INSERT INTO contacts (uuid, company_uuid, name, email, phone, type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (company_uuid, email) DO NOTHING
            RETURNING {CONTACT_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(contact.company_uuid)
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(contact.contact_type)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(created) = inserted {
            return Ok(EnsuredContact {
                contact: created,
                created: true,
            });
        }

        // 只有带邮箱的插入才会冲突
        let email = contact.email.as_deref().unwrap_or_default();
        let existing = sqlx::query_as::<_, Contact>(&format!(
            r#"
            SELECT {CONTACT_COLUMNS}
            FROM contacts
            WHERE company_uuid = $1 AND email = $2
            "#
        ))
        .bind(contact.company_uuid)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(EnsuredContact {
            contact: existing,
            created: false,
        })
    }
}

#[async_trait]
impl IdentityRepositoryTrait for IdentityRepository {
    async fn find_user_in_company(
        &self,
        email: &str,
        company_uuid: Uuid,
    ) -> Result<Option<User>> {
        self.find_user_in_company(email, company_uuid).await
    }

    async fn find_user(&self, email: &str) -> Result<Option<User>> {
        self.find_user(email).await
    }

    async fn find_contact_in_company(
        &self,
        email: &str,
        company_uuid: Uuid,
    ) -> Result<Option<Contact>> {
        self.find_contact_in_company(email, company_uuid).await
    }

    async fn find_contact(&self, email: &str) -> Result<Option<Contact>> {
        self.find_contact(email).await
    }

    async fn find_or_create_contact(&self, contact: &NewContact) -> Result<EnsuredContact> {
        self.find_or_create_contact(contact).await
    }
}
