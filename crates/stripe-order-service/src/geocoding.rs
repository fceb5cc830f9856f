//! 地址地理编码
//!
//! 地理编码永远不会让订单创建失败：没有地址、没有 API Key、服务返回非 OK、
//! 结果为空、网络错误或超时，都会记录日志并返回 (0, 0)。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_shared::config::GeocodingConfig;
use bridge_shared::error::BridgeError;
use bridge_shared::observability::metrics;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::events::PostalAddress;
use crate::models::Coordinates;

/// 地址片段之间的分隔符
pub const ADDRESS_DELIMITER: &str = ", ";

/// 地理编码错误，只在适配器内部流转
#[derive(Debug, thiserror::Error)]
pub enum GeocodingError {
    #[error("地理编码请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("地理编码服务返回 HTTP {0}")]
    HttpStatus(u16),

    #[error("地理编码超时")]
    Timeout,

    #[error("地理编码状态异常: {status}")]
    Status {
        status: String,
        message: Option<String>,
    },

    #[error("地理编码没有返回结果")]
    NoResults,
}

impl GeocodingError {
    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Timeout => "timeout",
            Self::Http(_) | Self::HttpStatus(_) => "error",
            Self::Status { .. } => "bad_status",
            Self::NoResults => "no_results",
        }
    }
}

/// 把地址拼成单行字符串
///
/// 依次取街道、城市、省/州、邮编、国家，丢弃空片段。全部为空时返回 None。
pub fn format_address(address: &PostalAddress) -> Option<String> {
    let parts: Vec<&str> = [
        &address.line1,
        &address.city,
        &address.state,
        &address.postal_code,
        &address.country,
    ]
    .into_iter()
    .filter_map(|part| part.as_deref().map(str::trim))
    .filter(|part| !part.is_empty())
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(ADDRESS_DELIMITER))
    }
}

/// 地理编码客户端
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeocodingClient: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Coordinates, GeocodingError>;
}

// ---------------------------------------------------------------------------
// Google Geocoding API
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

/// Google Geocoding API 客户端
pub struct GoogleGeocodingClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GoogleGeocodingClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl GeocodingClient for GoogleGeocodingClient {
    async fn geocode(&self, address: &str) -> Result<Coordinates, GeocodingError> {
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[("address", address), ("key", self.api_key.as_str())])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(GeocodingError::HttpStatus(resp.status().as_u16()));
        }

        let body: GeocodeResponse = resp.json().await?;
        if body.status != "OK" {
            return Err(GeocodingError::Status {
                status: body.status,
                message: body.error_message,
            });
        }

        body.results
            .into_iter()
            .next()
            .map(|r| Coordinates::new(r.geometry.location.lat, r.geometry.location.lng))
            .ok_or(GeocodingError::NoResults)
    }
}

// ---------------------------------------------------------------------------
// GeocodingAdapter
// ---------------------------------------------------------------------------

/// 地理编码适配器
///
/// 未配置 API Key 时 client 为空，所有请求直接返回默认坐标
pub struct GeocodingAdapter {
    client: Option<Arc<dyn GeocodingClient>>,
    timeout: Duration,
}

impl GeocodingAdapter {
    pub fn new(client: Option<Arc<dyn GeocodingClient>>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// 按配置构造，服务端 Key 优先
    pub fn from_config(config: &GeocodingConfig) -> Result<Self, BridgeError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = match config.effective_api_key() {
            Some(key) => {
                let client = GoogleGeocodingClient::new(&config.endpoint, key, timeout)?;
                Some(Arc::new(client) as Arc<dyn GeocodingClient>)
            }
            None => {
                warn!("未配置地理编码 API Key，所有地点将使用默认坐标");
                None
            }
        };
        Ok(Self::new(client, timeout))
    }

    /// 不调用外部服务的适配器
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(5))
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// 将地址解析为坐标，任何失败都回退到 (0, 0)
    pub async fn geocode(&self, address: Option<&PostalAddress>) -> Coordinates {
        let Some(address_line) = address.and_then(format_address) else {
            debug!("没有可用地址，跳过地理编码");
            metrics::record_geocoding("skipped");
            return Coordinates::NULL_ISLAND;
        };

        let Some(client) = &self.client else {
            debug!(address = %address_line, "未配置 API Key，跳过地理编码");
            metrics::record_geocoding("skipped");
            return Coordinates::NULL_ISLAND;
        };

        let result = match tokio::time::timeout(self.timeout, client.geocode(&address_line)).await
        {
            Ok(result) => result,
            Err(_) => Err(GeocodingError::Timeout),
        };

        match result {
            Ok(coords) => {
                info!(
                    address = %address_line,
                    latitude = coords.latitude,
                    longitude = coords.longitude,
                    "地址地理编码成功"
                );
                metrics::record_geocoding("success");
                coords
            }
            Err(e) => {
                warn!(address = %address_line, error = %e, "地址地理编码失败，使用默认坐标");
                metrics::record_geocoding(e.label());
                Coordinates::NULL_ISLAND
            }
        }
    }
}
