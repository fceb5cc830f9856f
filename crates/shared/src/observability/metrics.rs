//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册事件管道指标的 HELP 描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "stripe_events_total",
        "Total number of Stripe events dispatched, by type and outcome"
    );
    metrics::describe_histogram!(
        "stripe_event_duration_seconds",
        "Stripe event processing duration in seconds"
    );
    metrics::describe_counter!("orders_created_total", "Total number of orders created");
    metrics::describe_counter!("contacts_created_total", "Total number of contacts created");
    metrics::describe_counter!(
        "geocoding_requests_total",
        "Total number of geocoding lookups, by result"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次事件分发
#[inline]
pub fn record_stripe_event(event_type: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "stripe_events_total",
        "event_type" => event_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "stripe_event_duration_seconds",
        "event_type" => event_type.to_string()
    )
    .record(duration_secs);
}

/// 记录订单创建
#[inline]
pub fn record_order_created() {
    metrics::counter!("orders_created_total").increment(1);
}

/// 记录联系人创建
#[inline]
pub fn record_contact_created(source: &str) {
    metrics::counter!("contacts_created_total", "source" => source.to_string()).increment(1);
}

/// 记录地理编码结果（success / failed / skipped）
#[inline]
pub fn record_geocoding(result: &str) {
    metrics::counter!("geocoding_requests_total", "result" => result.to_string()).increment(1);
}
