//! Stripe 订单同步服务
//!
//! 启动流程：加载配置 -> 初始化可观测性 -> 连接数据库并执行迁移 -> 装配管道 -> 运行 Worker。

use std::sync::Arc;

use bridge_shared::config::AppConfig;
use bridge_shared::database::Database;
use bridge_shared::observability;
use bridge_shared::retry::RetryPolicy;
use stripe_order_service::geocoding::GeocodingAdapter;
use stripe_order_service::notifier::LogOrderNotifier;
use stripe_order_service::pipeline::{Repositories, build_dispatcher};
use stripe_order_service::worker::WebhookWorker;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("stripe-order-service")?;
    let _guard = observability::init(&config.observability).await?;

    info!(
        environment = %config.environment,
        target_company = ?config.stripe.target_company_identifier,
        max_attempts = config.stripe.max_attempts,
        "Starting stripe-order-service..."
    );

    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;

    let repos = Repositories::postgres(db.pool().clone());
    let geocoder = GeocodingAdapter::from_config(&config.geocoding)?;
    let dispatcher = Arc::new(build_dispatcher(
        &repos,
        &config.stripe,
        RetryPolicy::from_config(&config.stripe, &config.worker),
        geocoder,
        Arc::new(LogOrderNotifier),
    ));

    let worker = WebhookWorker::new(repos.ledger.clone(), dispatcher, &config.worker);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    worker_handle.await?;

    db.close().await;
    info!("stripe-order-service shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
