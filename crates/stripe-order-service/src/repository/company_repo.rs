//! 租户仓储
//!
//! 只读访问 companies 表，本服务从不创建租户

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::CompanyRepositoryTrait;
use crate::error::Result;
use crate::models::Company;

pub struct CompanyRepository {
    pool: PgPool,
}

impl CompanyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Company>> {
        let company = sqlx::query_as::<_, Company>(
            r#"
            SELECT uuid, public_id, name, created_at
            FROM companies
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(company)
    }

    pub async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Company>> {
        let company = sqlx::query_as::<_, Company>(
            r#"
            SELECT uuid, public_id, name, created_at
            FROM companies
            WHERE public_id = $1
            "#,
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(company)
    }

    pub async fn first_company(&self) -> Result<Option<Company>> {
        let company = sqlx::query_as::<_, Company>(
            r#"
            SELECT uuid, public_id, name, created_at
            FROM companies
            ORDER BY created_at ASC, uuid ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(company)
    }
}

#[async_trait]
impl CompanyRepositoryTrait for CompanyRepository {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<Company>> {
        self.find_by_uuid(uuid).await
    }

    async fn find_by_public_id(&self, public_id: &str) -> Result<Option<Company>> {
        self.find_by_public_id(public_id).await
    }

    async fn first_company(&self) -> Result<Option<Company>> {
        self.first_company().await
    }
}
