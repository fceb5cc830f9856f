//! Webhook 作业运行时
//!
//! 轮询台账中到期的 received 事件，以有限并发交给派发器处理。
//! 可重试的失败由派发器按退避策略推迟 available_at，到期后在后续轮次中被再次领取。

use std::sync::Arc;
use std::time::Duration;

use bridge_shared::config::WorkerConfig;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{error, info};

use crate::dispatcher::{DispatchOutcome, EventDispatcher};
use crate::error::Result;
use crate::repository::EventLedgerRepositoryTrait;

/// 一轮轮询的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// 失败后已排期重试的数量（同时计入 failed）
    pub requeued: usize,
}

/// Webhook 作业运行时
pub struct WebhookWorker {
    ledger: Arc<dyn EventLedgerRepositoryTrait>,
    dispatcher: Arc<EventDispatcher>,
    poll_interval: Duration,
    batch_size: i64,
    concurrency: usize,
}

impl WebhookWorker {
    pub fn new(
        ledger: Arc<dyn EventLedgerRepositoryTrait>,
        dispatcher: Arc<EventDispatcher>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
        }
    }

    /// 主循环，直到收到 shutdown 信号
    ///
    /// 正在处理的一批事件会完整结束后才检查关闭信号，不会留下中断的处理。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            concurrency = self.concurrency,
            "WebhookWorker 已启动"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(summary) if summary != PollSummary::default() => {
                    info!(
                        completed = summary.completed,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        requeued = summary.requeued,
                        "本轮事件处理结束"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "轮询待处理事件失败"),
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("WebhookWorker 已停止");
    }

    /// 执行一轮：领取到期事件并以有限并发处理
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let due = self.ledger.list_due(Utc::now(), self.batch_size).await?;
        if due.is_empty() {
            return Ok(PollSummary::default());
        }

        let outcomes: Vec<DispatchOutcome> = futures::stream::iter(due)
            .map(|record| async move { self.dispatcher.process_record(&record).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = PollSummary::default();
        for outcome in outcomes {
            match outcome {
                DispatchOutcome::Completed(_) => summary.completed += 1,
                DispatchOutcome::Skipped(_) => summary.skipped += 1,
                DispatchOutcome::Failed(failure) => {
                    summary.failed += 1;
                    if failure.retry_at.is_some() {
                        summary.requeued += 1;
                    }
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocoding::GeocodingAdapter;
    use crate::models::{Company, EventStatus};
    use crate::notifier::LogOrderNotifier;
    use crate::pipeline::{Repositories, build_dispatcher};
    use crate::repository::{FaultPoint, InMemoryStore};
    use bridge_shared::config::StripeConfig;
    use bridge_shared::retry::RetryPolicy;
    use bridge_shared::test_utils::{CheckoutSessionBuilder, stripe_event, test_event_id};

    fn worker(
        store: &InMemoryStore,
        target: Option<&Company>,
        max_attempts: u32,
        retry_delay_ms: u64,
    ) -> WebhookWorker {
        let stripe = StripeConfig {
            target_company_identifier: target.map(|c| c.uuid.to_string()),
            max_attempts,
        };
        let worker_config = WorkerConfig {
            retry_initial_delay_ms: retry_delay_ms,
            retry_max_delay_ms: retry_delay_ms,
            ..Default::default()
        };
        let repos = Repositories::in_memory(store);
        let dispatcher = Arc::new(build_dispatcher(
            &repos,
            &stripe,
            RetryPolicy::from_config(&stripe, &worker_config),
            GeocodingAdapter::disabled(),
            Arc::new(LogOrderNotifier),
        ));
        WebhookWorker::new(repos.ledger.clone(), dispatcher, &worker_config)
    }

    #[tokio::test]
    async fn test_poll_once_processes_due_events() {
        let store = InMemoryStore::new();
        for _ in 0..3 {
            let event_id = test_event_id();
            store
                .record_received(
                    &event_id,
                    "invoice.paid",
                    &stripe_event(&event_id, "invoice.paid", serde_json::json!({})),
                )
                .await
                .unwrap();
        }

        let summary = worker(&store, None, 5, 0).poll_once().await.unwrap();
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.failed, 0);

        // 已完成的事件不会再被领取
        let summary = worker(&store, None, 5, 0).poll_once().await.unwrap();
        assert_eq!(summary, PollSummary::default());
    }

    #[tokio::test]
    async fn test_retryable_failure_is_requeued_until_attempts_exhausted() {
        let store = InMemoryStore::new();
        let company = store.seed_company("Acme", Utc::now());
        store.inject_fault(FaultPoint::CreateOrder);

        let event_id = test_event_id();
        store
            .record_received(
                &event_id,
                "checkout.session.completed",
                &CheckoutSessionBuilder::new().build_event(&event_id),
            )
            .await
            .unwrap();

        let worker = worker(&store, Some(&company), 3, 0);

        let first = worker.poll_once().await.unwrap();
        assert_eq!((first.failed, first.requeued), (1, 1));
        let record = store.event(&event_id).unwrap();
        assert_eq!(record.status, EventStatus::Received);
        assert_eq!(record.attempts, 1);
        assert!(record.error_message.is_some());

        let second = worker.poll_once().await.unwrap();
        assert_eq!((second.failed, second.requeued), (1, 1));
        assert_eq!(store.event(&event_id).unwrap().status, EventStatus::Received);

        let third = worker.poll_once().await.unwrap();
        assert_eq!((third.failed, third.requeued), (1, 0));

        let record = store.event(&event_id).unwrap();
        assert_eq!(record.status, EventStatus::Failed);
        assert_eq!(record.attempts, 3);
        assert!(record.error_message.is_some());
    }

    #[tokio::test]
    async fn test_requeued_event_waits_for_backoff() {
        let store = InMemoryStore::new();
        let company = store.seed_company("Acme", Utc::now());
        store.inject_fault(FaultPoint::CreatePlace);

        let event_id = test_event_id();
        store
            .record_received(
                &event_id,
                "checkout.session.completed",
                &CheckoutSessionBuilder::new().build_event(&event_id),
            )
            .await
            .unwrap();

        let worker = worker(&store, Some(&company), 5, 60_000);
        let first = worker.poll_once().await.unwrap();
        assert_eq!(first.requeued, 1);

        // 退避时间未到，本轮没有到期事件
        let second = worker.poll_once().await.unwrap();
        assert_eq!(second, PollSummary::default());
        assert!(store.event(&event_id).unwrap().available_at > Utc::now());
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_requeued() {
        let store = InMemoryStore::new();
        let event_id = test_event_id();
        store
            .record_received(
                &event_id,
                "customer.created",
                &serde_json::json!({"id": event_id, "data": "not an object"}),
            )
            .await
            .unwrap();

        let summary = worker(&store, None, 5, 0).poll_once().await.unwrap();
        assert_eq!((summary.failed, summary.requeued), (1, 0));
        assert_eq!(store.event(&event_id).unwrap().status, EventStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = InMemoryStore::new();
        let worker = worker(&store, None, 5, 0);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { worker.run(rx).await });
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
