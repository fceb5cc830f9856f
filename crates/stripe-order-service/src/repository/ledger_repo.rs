//! 事件台账仓储
//!
//! stripe_events 表的数据访问。状态迁移全部使用带前置状态条件的 UPDATE，
//! 由数据库保证同一事件只会被一个 worker 切换到 processing。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::traits::EventLedgerRepositoryTrait;
use crate::error::Result;
use crate::models::{BeginOutcome, BufferOutcome, EventRecord, EventStatus};

const EVENT_COLUMNS: &str = "id, event_id, event_type, payload, status, attempts, error_message, \
                             processed_at, available_at, created_at, updated_at";

/// 事件台账仓储
pub struct EventLedgerRepository {
    pool: PgPool,
}

impl EventLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 摄取方写入事件
    ///
    /// 不存在则插入；已存在且为 failed 时重置为 received（重新投递）；
    /// 其余情况视为重复投递，原样返回当前状态。
    pub async fn record_received(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<BufferOutcome> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO stripe_events (event_id, event_type, payload, status, attempts, available_at, created_at, updated_at)
            VALUES ($1, $2, $3, 'received', 0, NOW(), NOW(), NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(BufferOutcome::Inserted);
        }

        if self.requeue_failed(event_id).await? {
            return Ok(BufferOutcome::Requeued);
        }

        let status: Option<EventStatus> =
            sqlx::query_scalar("SELECT status FROM stripe_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(BufferOutcome::Duplicate(status.unwrap_or_default()))
    }

    pub async fn get(&self, event_id: &str) -> Result<Option<EventRecord>> {
        let record = sqlx::query_as::<_, EventRecord>(&format!(
            "SELECT {EVENT_COLUMNS} FROM stripe_events WHERE event_id = $1"
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// received -> processing 的原子切换
    pub async fn begin_processing(&self, event_id: &str) -> Result<BeginOutcome> {
        let started = sqlx::query_as::<_, EventRecord>(&format!(
            r#"
            UPDATE stripe_events
            SET status = 'processing', updated_at = NOW()
            WHERE event_id = $1 AND status = 'received'
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(record) = started {
            return Ok(BeginOutcome::Started(record));
        }

        let status: Option<EventStatus> =
            sqlx::query_scalar("SELECT status FROM stripe_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match status {
            Some(status) => BeginOutcome::NotReceived(status),
            None => BeginOutcome::NotFound,
        })
    }

    pub async fn mark_completed(&self, event_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE stripe_events
            SET status = 'completed', error_message = NULL, processed_at = NOW(), updated_at = NOW()
            WHERE event_id = $1 AND status = 'processing'
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(event_id, "事件不处于 processing，忽略完成标记");
        }
        Ok(())
    }

    /// 标记失败并累加失败次数
    pub async fn mark_failed(&self, event_id: &str, error_message: &str) -> Result<i32> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE stripe_events
            SET status = 'failed', error_message = $2, attempts = attempts + 1, updated_at = NOW()
            WHERE event_id = $1 AND status = 'processing'
            RETURNING attempts
            "#,
        )
        .bind(event_id)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await?;

        match attempts {
            Some(attempts) => Ok(attempts),
            None => {
                debug!(event_id, "事件不处于 processing，忽略失败标记");
                let current: Option<i32> =
                    sqlx::query_scalar("SELECT attempts FROM stripe_events WHERE event_id = $1")
                        .bind(event_id)
                        .fetch_optional(&self.pool)
                        .await?;
                Ok(current.unwrap_or(0))
            }
        }
    }

    /// 可重试的失败：processing -> received，累加失败次数并推迟到 available_at
    ///
    /// 事件不会经过 failed，外部观察到的状态始终单调前进
    pub async fn schedule_retry(
        &self,
        event_id: &str,
        error_message: &str,
        available_at: DateTime<Utc>,
    ) -> Result<i32> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE stripe_events
            SET status = 'received', error_message = $2, attempts = attempts + 1,
                available_at = $3, updated_at = NOW()
            WHERE event_id = $1 AND status = 'processing'
            RETURNING attempts
            "#,
        )
        .bind(event_id)
        .bind(error_message)
        .bind(available_at)
        .fetch_optional(&self.pool)
        .await?;

        match attempts {
            Some(attempts) => Ok(attempts),
            None => {
                debug!(event_id, "事件不处于 processing，忽略重试排期");
                let current: Option<i32> =
                    sqlx::query_scalar("SELECT attempts FROM stripe_events WHERE event_id = $1")
                        .bind(event_id)
                        .fetch_optional(&self.pool)
                        .await?;
                Ok(current.unwrap_or(0))
            }
        }
    }

    /// 重新投递：failed -> received
    async fn requeue_failed(&self, event_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE stripe_events
            SET status = 'received', available_at = NOW(), updated_at = NOW()
            WHERE event_id = $1 AND status = 'failed'
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 列出到期待处理的事件
    ///
    /// 多实例可能列出同一事件，处理权由 begin_processing 的条件更新决定
    pub async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<EventRecord>> {
        let records = sqlx::query_as::<_, EventRecord>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM stripe_events
            WHERE status = 'received' AND available_at <= $1
            ORDER BY available_at ASC, id ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

#[async_trait]
impl EventLedgerRepositoryTrait for EventLedgerRepository {
    async fn record_received(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<BufferOutcome> {
        self.record_received(event_id, event_type, payload).await
    }

    async fn get(&self, event_id: &str) -> Result<Option<EventRecord>> {
        self.get(event_id).await
    }

    async fn begin_processing(&self, event_id: &str) -> Result<BeginOutcome> {
        self.begin_processing(event_id).await
    }

    async fn mark_completed(&self, event_id: &str) -> Result<()> {
        self.mark_completed(event_id).await
    }

    async fn mark_failed(&self, event_id: &str, error_message: &str) -> Result<i32> {
        self.mark_failed(event_id, error_message).await
    }

    async fn schedule_retry(
        &self,
        event_id: &str,
        error_message: &str,
        available_at: DateTime<Utc>,
    ) -> Result<i32> {
        self.schedule_retry(event_id, error_message, available_at)
            .await
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<EventRecord>> {
        self.list_due(now, limit).await
    }
}
