//! 身份与租户解析链
//!
//! 结账事件需要同时确定订单归属的租户和客户联系人。解析按固定优先级执行，
//! 每个策略返回可选的匹配结果，第一个命中的策略胜出：
//!
//! 1. 目标租户下邮箱匹配的用户
//! 2. 任意租户下邮箱匹配的用户
//! 3. 目标租户下邮箱匹配的联系人
//! 4. 任意租户下邮箱匹配的联系人
//! 5. 配置的目标租户（需在存储中存在）
//! 6. 存储中的第一个租户，仅当目标租户已解析出键但在存储中不存在时启用
//!
//! 未配置目标租户，或公开 ID 查不到时，不会落到任意租户上。
//!
//! 命中后若尚无联系人，则在解析出的租户下查找或创建联系人。

use std::sync::Arc;

use async_trait::async_trait;
use bridge_shared::observability::metrics;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{OrderSyncError, Result};
use crate::models::{Contact, ContactType, EnsuredContact, NewContact};
use crate::repository::{CompanyRepositoryTrait, IdentityRepositoryTrait};
use crate::tenant::TenantResolver;

/// 未提供姓名时的默认联系人名称
pub const DEFAULT_CUSTOMER_NAME: &str = "Stripe Customer";

/// 单次解析的输入
#[derive(Debug, Clone, Copy)]
pub struct ResolutionContext<'a> {
    pub email: Option<&'a str>,
    /// 已解析的目标租户
    pub target_tenant: Option<Uuid>,
}

/// 策略命中结果
#[derive(Debug, Clone)]
pub struct ResolutionMatch {
    pub company_uuid: Uuid,
    /// 联系人策略命中时携带联系人
    pub contact: Option<Contact>,
}

/// 解析策略
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, ctx: &ResolutionContext<'_>) -> Result<Option<ResolutionMatch>>;
}

// ---------------------------------------------------------------------------
// 策略实现
// ---------------------------------------------------------------------------

pub struct UserInTargetTenant {
    identities: Arc<dyn IdentityRepositoryTrait>,
}

#[async_trait]
impl ResolutionStrategy for UserInTargetTenant {
    fn name(&self) -> &'static str {
        "user_in_target_tenant"
    }

    async fn resolve(&self, ctx: &ResolutionContext<'_>) -> Result<Option<ResolutionMatch>> {
        let (Some(email), Some(target)) = (ctx.email, ctx.target_tenant) else {
            return Ok(None);
        };
        let user = self.identities.find_user_in_company(email, target).await?;
        Ok(user.map(|_| ResolutionMatch {
            company_uuid: target,
            contact: None,
        }))
    }
}

pub struct AnyUser {
    identities: Arc<dyn IdentityRepositoryTrait>,
}

#[async_trait]
impl ResolutionStrategy for AnyUser {
    fn name(&self) -> &'static str {
        "any_user"
    }

    async fn resolve(&self, ctx: &ResolutionContext<'_>) -> Result<Option<ResolutionMatch>> {
        let Some(email) = ctx.email else {
            return Ok(None);
        };
        let user = self.identities.find_user(email).await?;
        Ok(user
            .and_then(|u| u.company_uuid)
            .map(|company_uuid| ResolutionMatch {
                company_uuid,
                contact: None,
            }))
    }
}

pub struct ContactInTargetTenant {
    identities: Arc<dyn IdentityRepositoryTrait>,
}

#[async_trait]
impl ResolutionStrategy for ContactInTargetTenant {
    fn name(&self) -> &'static str {
        "contact_in_target_tenant"
    }

    async fn resolve(&self, ctx: &ResolutionContext<'_>) -> Result<Option<ResolutionMatch>> {
        let (Some(email), Some(target)) = (ctx.email, ctx.target_tenant) else {
            return Ok(None);
        };
        let contact = self.identities.find_contact_in_company(email, target).await?;
        Ok(contact.map(|c| ResolutionMatch {
            company_uuid: c.company_uuid,
            contact: Some(c),
        }))
    }
}

pub struct AnyContact {
    identities: Arc<dyn IdentityRepositoryTrait>,
}

#[async_trait]
impl ResolutionStrategy for AnyContact {
    fn name(&self) -> &'static str {
        "any_contact"
    }

    async fn resolve(&self, ctx: &ResolutionContext<'_>) -> Result<Option<ResolutionMatch>> {
        let Some(email) = ctx.email else {
            return Ok(None);
        };
        let contact = self.identities.find_contact(email).await?;
        Ok(contact.map(|c| ResolutionMatch {
            company_uuid: c.company_uuid,
            contact: Some(c),
        }))
    }
}

/// 配置的目标租户，仅在存储中存在时命中
pub struct DefaultTenant {
    companies: Arc<dyn CompanyRepositoryTrait>,
}

#[async_trait]
impl ResolutionStrategy for DefaultTenant {
    fn name(&self) -> &'static str {
        "default_tenant"
    }

    async fn resolve(&self, ctx: &ResolutionContext<'_>) -> Result<Option<ResolutionMatch>> {
        let Some(target) = ctx.target_tenant else {
            return Ok(None);
        };
        let company = self.companies.find_by_uuid(target).await?;
        if company.is_none() {
            debug!(company_uuid = %target, "目标租户在存储中不存在");
        }
        Ok(company.map(|c| ResolutionMatch {
            company_uuid: c.uuid,
            contact: None,
        }))
    }
}

/// 按自然顺序的第一个租户
///
/// 只在目标租户已解析出键时兜底，此时前一步已确认该键在存储中不存在。
pub struct FirstTenant {
    companies: Arc<dyn CompanyRepositoryTrait>,
}

#[async_trait]
impl ResolutionStrategy for FirstTenant {
    fn name(&self) -> &'static str {
        "first_tenant"
    }

    async fn resolve(&self, ctx: &ResolutionContext<'_>) -> Result<Option<ResolutionMatch>> {
        let Some(target) = ctx.target_tenant else {
            return Ok(None);
        };
        let company = self.companies.first_company().await?;
        if let Some(company) = &company {
            warn!(
                target_tenant = %target,
                company_uuid = %company.uuid,
                "目标租户不存在，回退到第一个租户"
            );
        }
        Ok(company.map(|c| ResolutionMatch {
            company_uuid: c.uuid,
            contact: None,
        }))
    }
}

// ---------------------------------------------------------------------------
// 解析链
// ---------------------------------------------------------------------------

/// 解析出的订单客户
#[derive(Debug, Clone)]
pub struct ResolvedCustomer {
    pub company_uuid: Uuid,
    pub contact: Contact,
    pub contact_created: bool,
    /// 命中的策略名称
    pub matched_by: &'static str,
}

/// 身份解析链
pub struct IdentityResolutionChain {
    tenants: Arc<TenantResolver>,
    identities: Arc<dyn IdentityRepositoryTrait>,
    strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl IdentityResolutionChain {
    /// 使用标准六步策略构造
    pub fn new(
        tenants: Arc<TenantResolver>,
        companies: Arc<dyn CompanyRepositoryTrait>,
        identities: Arc<dyn IdentityRepositoryTrait>,
    ) -> Self {
        let strategies: Vec<Box<dyn ResolutionStrategy>> = vec![
            Box::new(UserInTargetTenant {
                identities: identities.clone(),
            }),
            Box::new(AnyUser {
                identities: identities.clone(),
            }),
            Box::new(ContactInTargetTenant {
                identities: identities.clone(),
            }),
            Box::new(AnyContact {
                identities: identities.clone(),
            }),
            Box::new(DefaultTenant {
                companies: companies.clone(),
            }),
            Box::new(FirstTenant { companies }),
        ];
        Self::with_strategies(tenants, identities, strategies)
    }

    pub fn with_strategies(
        tenants: Arc<TenantResolver>,
        identities: Arc<dyn IdentityRepositoryTrait>,
        strategies: Vec<Box<dyn ResolutionStrategy>>,
    ) -> Self {
        Self {
            tenants,
            identities,
            strategies,
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// 结账事件：解析租户与联系人
    ///
    /// 没有邮箱时身份策略全部跳过，只剩租户兜底。
    /// 所有策略都未命中时返回 `TenantUnresolved`，不创建任何记录。
    pub async fn resolve_tenant_and_contact(
        &self,
        email: Option<&str>,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<ResolvedCustomer> {
        let ctx = ResolutionContext {
            email,
            target_tenant: self.tenants.resolve_configured_tenant().await?,
        };

        let mut resolved = None;
        for strategy in &self.strategies {
            if let Some(found) = strategy.resolve(&ctx).await? {
                debug!(
                    strategy = strategy.name(),
                    company_uuid = %found.company_uuid,
                    "身份解析命中"
                );
                resolved = Some((strategy.name(), found));
                break;
            }
        }

        let Some((matched_by, found)) = resolved else {
            error!(email = ?email, "无法解析订单归属租户");
            return Err(OrderSyncError::TenantUnresolved(
                "没有匹配的身份，且不存在可用的租户".to_string(),
            ));
        };

        let (contact, contact_created) = match found.contact {
            Some(contact) => (contact, false),
            None => {
                let ensured = self
                    .create_contact(found.company_uuid, email, name, phone)
                    .await?;
                (ensured.contact, ensured.created)
            }
        };

        info!(
            company_uuid = %found.company_uuid,
            contact_uuid = %contact.uuid,
            matched_by,
            contact_created,
            "订单客户解析完成"
        );

        Ok(ResolvedCustomer {
            company_uuid: found.company_uuid,
            contact,
            contact_created,
            matched_by,
        })
    }

    /// 客户创建事件：在目标租户下确保联系人存在
    ///
    /// 没有邮箱时什么也不做；目标租户无法解析时记录错误后返回，不算事件失败。
    pub async fn ensure_contact(
        &self,
        email: Option<&str>,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Option<EnsuredContact>> {
        let Some(email) = email else {
            debug!("客户没有邮箱，跳过联系人同步");
            return Ok(None);
        };

        let Some(company_uuid) = self.tenants.resolve_configured_tenant().await? else {
            error!(email, "目标租户未配置或无法解析，跳过联系人同步");
            return Ok(None);
        };

        let ensured = self
            .create_contact(company_uuid, Some(email), name, phone)
            .await?;

        info!(
            company_uuid = %company_uuid,
            contact_uuid = %ensured.contact.uuid,
            created = ensured.created,
            "联系人同步完成"
        );

        Ok(Some(ensured))
    }

    async fn create_contact(
        &self,
        company_uuid: Uuid,
        email: Option<&str>,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<EnsuredContact> {
        let new_contact = NewContact {
            company_uuid,
            name: name.unwrap_or(DEFAULT_CUSTOMER_NAME).to_string(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            contact_type: ContactType::Customer,
        };

        let ensured = self.identities.find_or_create_contact(&new_contact).await?;
        if ensured.created {
            metrics::record_contact_created("stripe");
        }
        Ok(ensured)
    }
}
