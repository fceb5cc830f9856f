//! 地点仓储

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::PlaceRepositoryTrait;
use crate::error::Result;
use crate::models::{NewPlace, Place};

const PLACE_COLUMNS: &str = "uuid, company_uuid, name, street1, street2, city, province, \
                             postal_code, country, latitude, longitude, created_at";

pub struct PlaceRepository {
    pool: PgPool,
}

impl PlaceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_place(&self, place: &NewPlace) -> Result<Place> {
        let created = sqlx::query_as::<_, Place>(&format!(
            r#"
            INSERT INTO places (uuid, company_uuid, name, street1, street2, city, province,
                                postal_code, country, latitude, longitude, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            RETURNING {PLACE_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(place.company_uuid)
        .bind(&place.name)
        .bind(&place.street1)
        .bind(&place.street2)
        .bind(&place.city)
        .bind(&place.province)
        .bind(&place.postal_code)
        .bind(&place.country)
        .bind(place.location.latitude)
        .bind(place.location.longitude)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    /// 名称匹配（不区分大小写）任一关键字的最早地点
    pub async fn find_place_by_keywords(
        &self,
        company_uuid: Uuid,
        keywords: &[String],
        exclude: Uuid,
    ) -> Result<Option<Place>> {
        let patterns: Vec<String> = keywords.iter().map(|k| format!("%{k}%")).collect();

        let place = sqlx::query_as::<_, Place>(&format!(
            r#"
            SELECT {PLACE_COLUMNS}
            FROM places
            WHERE company_uuid = $1 AND uuid <> $2 AND name ILIKE ANY($3)
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(company_uuid)
        .bind(exclude)
        .bind(&patterns)
        .fetch_optional(&self.pool)
        .await?;

        Ok(place)
    }

    pub async fn find_oldest_place(
        &self,
        company_uuid: Uuid,
        exclude: Uuid,
    ) -> Result<Option<Place>> {
        let place = sqlx::query_as::<_, Place>(&format!(
            r#"
            SELECT {PLACE_COLUMNS}
            FROM places
            WHERE company_uuid = $1 AND uuid <> $2
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(company_uuid)
        .bind(exclude)
        .fetch_optional(&self.pool)
        .await?;

        Ok(place)
    }
}

#[async_trait]
impl PlaceRepositoryTrait for PlaceRepository {
    async fn create_place(&self, place: &NewPlace) -> Result<Place> {
        self.create_place(place).await
    }

    async fn find_place_by_keywords(
        &self,
        company_uuid: Uuid,
        keywords: &[String],
        exclude: Uuid,
    ) -> Result<Option<Place>> {
        self.find_place_by_keywords(company_uuid, keywords, exclude)
            .await
    }

    async fn find_oldest_place(
        &self,
        company_uuid: Uuid,
        exclude: Uuid,
    ) -> Result<Option<Place>> {
        self.find_oldest_place(company_uuid, exclude).await
    }
}
