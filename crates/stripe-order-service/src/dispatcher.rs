//! 事件派发器
//!
//! 管道的入口：抢占台账状态 -> 调用处理器 -> 写入结果。
//! 每次派发恰好两次台账写入：processing，然后 completed、failed，
//! 或者（可重试且次数未用尽时）带退避时间回到 received。
//! 处理失败不会在这里被吞掉，而是以 `DispatchOutcome::Failed` 交还给调用方。

use std::sync::Arc;
use std::time::Instant;

use bridge_shared::observability::metrics;
use bridge_shared::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::error::OrderSyncError;
use crate::models::{BeginOutcome, BufferOutcome, EventRecord, EventStatus};
use crate::processor::{HandlerOutcome, StripeEventProcessor};
use crate::repository::EventLedgerRepositoryTrait;

/// 跳过派发的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 台账中没有该事件
    RecordMissing,
    /// 其他 worker 正在处理
    InProgress,
    /// 已处于终态，不会再次进入 processing
    AlreadyTerminal(EventStatus),
}

/// 派发失败详情
#[derive(Debug)]
pub struct DispatchFailure {
    pub error: OrderSyncError,
    /// 作业运行时是否应该重试
    pub retryable: bool,
    /// 台账中累计的失败次数
    pub attempts: i32,
    /// 已排期的下次执行时间，None 表示事件停留在 failed
    pub retry_at: Option<DateTime<Utc>>,
}

/// 派发结果
#[derive(Debug)]
pub enum DispatchOutcome {
    Completed(HandlerOutcome),
    Skipped(SkipReason),
    Failed(DispatchFailure),
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(HandlerOutcome::Ignored { .. }) => "ignored",
            Self::Completed(_) => "completed",
            Self::Skipped(_) => "skipped",
            Self::Failed(f) if f.retry_at.is_some() => "retry_scheduled",
            Self::Failed(f) if f.retryable => "retryable_failure",
            Self::Failed(_) => "terminal_failure",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// 转为 Result，供只关心成败的调用方把失败继续向上抛
    pub fn into_result(self) -> Result<Option<HandlerOutcome>, OrderSyncError> {
        match self {
            Self::Completed(outcome) => Ok(Some(outcome)),
            Self::Skipped(_) => Ok(None),
            Self::Failed(failure) => Err(failure.error),
        }
    }
}

/// 事件派发器
pub struct EventDispatcher {
    ledger: Arc<dyn EventLedgerRepositoryTrait>,
    processor: Arc<StripeEventProcessor>,
    retry: RetryPolicy,
}

impl EventDispatcher {
    pub fn new(
        ledger: Arc<dyn EventLedgerRepositoryTrait>,
        processor: Arc<StripeEventProcessor>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            processor,
            retry,
        }
    }

    /// 处理台账中的一条记录
    pub async fn process_record(&self, record: &EventRecord) -> DispatchOutcome {
        self.process(&record.event_id, &record.event_type, &record.payload)
            .await
    }

    /// 处理一个事件
    ///
    /// 前置条件：摄取方已将事件以 received 状态写入台账
    pub async fn process(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> DispatchOutcome {
        let start = Instant::now();
        let outcome = self.dispatch(event_id, event_type, payload).await;
        metrics::record_stripe_event(event_type, outcome.label(), start.elapsed().as_secs_f64());
        outcome
    }

    async fn dispatch(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> DispatchOutcome {
        let record = match self.ledger.begin_processing(event_id).await {
            Ok(BeginOutcome::Started(record)) => record,
            Ok(BeginOutcome::NotFound) => {
                error!(event_id, "台账中不存在该事件");
                return DispatchOutcome::Skipped(SkipReason::RecordMissing);
            }
            Ok(BeginOutcome::NotReceived(status)) => {
                info!(event_id, status = %status, "事件不处于 received，跳过");
                return DispatchOutcome::Skipped(if status.is_terminal() {
                    SkipReason::AlreadyTerminal(status)
                } else {
                    SkipReason::InProgress
                });
            }
            Err(e) => {
                // 连 processing 都没写进去，台账保持原状态
                error!(event_id, error = %e, "抢占事件失败");
                return DispatchOutcome::Failed(DispatchFailure {
                    retryable: e.is_retryable(),
                    error: e,
                    attempts: 0,
                    retry_at: None,
                });
            }
        };

        info!(event_id, event_type, "事件状态已切换为 processing");

        match self.processor.handle(event_type, payload).await {
            Ok(outcome) => {
                if let Err(e) = self.ledger.mark_completed(event_id).await {
                    // 处理已生效但终态未写入，事件停留在 processing，不能重新排队
                    error!(event_id, error = %e, "写入 completed 状态失败");
                    return DispatchOutcome::Failed(DispatchFailure {
                        error: e,
                        retryable: false,
                        attempts: record.attempts,
                        retry_at: None,
                    });
                }
                info!(event_id, event_type, outcome = ?outcome, "事件处理完成");
                DispatchOutcome::Completed(outcome)
            }
            Err(e) => self.record_failure(&record, e).await,
        }
    }

    /// 写入失败结果
    ///
    /// 可重试且次数未用尽时回到 received 并按退避推迟，否则停留在 failed。
    /// `record.attempts` 是本次执行之前的失败次数，即已经发生的重试次数。
    async fn record_failure(
        &self,
        record: &EventRecord,
        error: OrderSyncError,
    ) -> DispatchOutcome {
        let event_id = record.event_id.as_str();
        let message = error.to_string();
        let retryable = error.is_retryable();
        let retries_so_far = u32::try_from(record.attempts).unwrap_or(0);

        if retryable && self.retry.should_retry(retries_so_far) {
            let delay = self.retry.delay_for_attempt(retries_so_far);
            let retry_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            match self.ledger.schedule_retry(event_id, &message, retry_at).await {
                Ok(attempts) => {
                    warn!(
                        event_id,
                        event_type = %record.event_type,
                        attempts,
                        delay = ?delay,
                        error = %message,
                        "事件处理失败，已排期重试"
                    );
                    return DispatchOutcome::Failed(DispatchFailure {
                        error,
                        retryable,
                        attempts,
                        retry_at: Some(retry_at),
                    });
                }
                Err(ledger_err) => {
                    // 排期没写进去，事件停留在 processing，由 failed 兜底
                    error!(event_id, error = %ledger_err, "写入重试排期失败");
                }
            }
        }

        let attempts = match self.ledger.mark_failed(event_id, &message).await {
            Ok(attempts) => attempts,
            Err(ledger_err) => {
                error!(event_id, error = %ledger_err, "写入 failed 状态失败");
                record.attempts + 1
            }
        };
        if retryable {
            warn!(event_id, attempts, error = %message, "事件重试次数已用尽，保持 failed");
        } else {
            error!(event_id, attempts, error = %message, "事件处理失败");
        }
        DispatchOutcome::Failed(DispatchFailure {
            error,
            retryable,
            attempts,
            retry_at: None,
        })
    }

    /// 摄取方写入事件的便捷入口，记录结果便于排查重复投递
    pub async fn buffer(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<BufferOutcome, OrderSyncError> {
        let outcome = self
            .ledger
            .record_received(event_id, event_type, payload)
            .await?;
        debug!(event_id, event_type, outcome = ?outcome, "事件已写入台账");
        Ok(outcome)
    }
}
