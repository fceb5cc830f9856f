//! 目标租户解析
//!
//! 配置中的租户标识在构造时解析为 `TenantIdentifier`，运行期不再读取环境。

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::repository::CompanyRepositoryTrait;

/// 公开 ID 前缀
pub const PUBLIC_ID_PREFIX: &str = "company_";

/// 配置的租户标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantIdentifier {
    /// 规范租户键，原样返回
    Canonical(Uuid),
    /// `company_` 前缀的公开 ID，需要查库
    PublicId(String),
    /// 无法识别的格式，解析结果为空
    Unrecognized(String),
}

impl TenantIdentifier {
    /// 空白配置视为未配置
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(uuid) = Uuid::parse_str(raw) {
            return Some(Self::Canonical(uuid));
        }
        if raw.starts_with(PUBLIC_ID_PREFIX) {
            return Some(Self::PublicId(raw.to_string()));
        }
        Some(Self::Unrecognized(raw.to_string()))
    }
}

/// 租户解析器
pub struct TenantResolver {
    companies: Arc<dyn CompanyRepositoryTrait>,
    identifier: Option<TenantIdentifier>,
}

impl TenantResolver {
    pub fn new(companies: Arc<dyn CompanyRepositoryTrait>, configured: Option<&str>) -> Self {
        Self {
            companies,
            identifier: configured.and_then(TenantIdentifier::parse),
        }
    }

    pub fn identifier(&self) -> Option<&TenantIdentifier> {
        self.identifier.as_ref()
    }

    /// 解析配置的目标租户
    ///
    /// 只读操作。规范键不做存在性校验，公开 ID 查不到时记录警告并返回 None。
    pub async fn resolve_configured_tenant(&self) -> Result<Option<Uuid>> {
        let Some(identifier) = &self.identifier else {
            debug!("未配置目标租户");
            return Ok(None);
        };

        match identifier {
            TenantIdentifier::Canonical(uuid) => Ok(Some(*uuid)),
            TenantIdentifier::PublicId(public_id) => {
                match self.companies.find_by_public_id(public_id).await? {
                    Some(company) => Ok(Some(company.uuid)),
                    None => {
                        warn!(public_id = %public_id, "目标租户公开 ID 不存在");
                        Ok(None)
                    }
                }
            }
            TenantIdentifier::Unrecognized(raw) => {
                warn!(identifier = %raw, "无法识别的目标租户标识");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Company;
    use crate::repository::MockCompanyRepositoryTrait;
    use chrono::Utc;

    #[test]
    fn test_parse_identifier() {
        let uuid = Uuid::new_v4();
        assert_eq!(
            TenantIdentifier::parse(&uuid.to_string()),
            Some(TenantIdentifier::Canonical(uuid))
        );
        assert_eq!(
            TenantIdentifier::parse(" company_abc123 "),
            Some(TenantIdentifier::PublicId("company_abc123".to_string()))
        );
        assert_eq!(
            TenantIdentifier::parse("acme"),
            Some(TenantIdentifier::Unrecognized("acme".to_string()))
        );
        assert_eq!(TenantIdentifier::parse("   "), None);
    }

    #[tokio::test]
    async fn test_absent_identifier_resolves_to_none() {
        let mut companies = MockCompanyRepositoryTrait::new();
        companies.expect_find_by_public_id().never();

        let resolver = TenantResolver::new(Arc::new(companies), None);
        assert_eq!(resolver.resolve_configured_tenant().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_canonical_key_returned_without_lookup() {
        let uuid = Uuid::new_v4();
        let mut companies = MockCompanyRepositoryTrait::new();
        companies.expect_find_by_uuid().never();
        companies.expect_find_by_public_id().never();

        let resolver = TenantResolver::new(Arc::new(companies), Some(&uuid.to_string()));
        assert_eq!(resolver.resolve_configured_tenant().await.unwrap(), Some(uuid));
    }

    #[tokio::test]
    async fn test_public_id_lookup() {
        let uuid = Uuid::new_v4();
        let mut companies = MockCompanyRepositoryTrait::new();
        companies
            .expect_find_by_public_id()
            .withf(|public_id| public_id == "company_abc123")
            .times(1)
            .returning(move |public_id| {
                Ok(Some(Company {
                    uuid,
                    public_id: Some(public_id.to_string()),
                    name: "Acme".to_string(),
                    created_at: Utc::now(),
                }))
            });

        let resolver = TenantResolver::new(Arc::new(companies), Some("company_abc123"));
        assert_eq!(resolver.resolve_configured_tenant().await.unwrap(), Some(uuid));
    }

    #[tokio::test]
    async fn test_unknown_public_id_resolves_to_none() {
        let mut companies = MockCompanyRepositoryTrait::new();
        companies
            .expect_find_by_public_id()
            .returning(|_| Ok(None));

        let resolver = TenantResolver::new(Arc::new(companies), Some("company_missing"));
        assert_eq!(resolver.resolve_configured_tenant().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unrecognized_identifier_resolves_to_none() {
        let companies = MockCompanyRepositoryTrait::new();
        let resolver = TenantResolver::new(Arc::new(companies), Some("42"));
        assert_eq!(resolver.resolve_configured_tenant().await.unwrap(), None);
    }
}
