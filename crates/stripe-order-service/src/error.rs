//! 订单同步服务专用错误类型
//!
//! 在共享库 BridgeError 基础上定义本服务特有的错误变体。
//! 查询未命中不是错误（它是解析链中的预期分支），地理编码失败在适配器内部吸收，
//! 因此这里只保留会让事件进入 failed 状态的情况。

use bridge_shared::error::BridgeError;

/// 订单同步处理错误
#[derive(Debug, thiserror::Error)]
pub enum OrderSyncError {
    /// 已处理的事件类型载荷与预期结构不符
    #[error("事件载荷格式非法: {event_type} - {reason}")]
    MalformedPayload { event_type: String, reason: String },

    /// 结账事件无法确定任何租户，整个事件中止
    #[error("无法确定订单归属租户: {0}")]
    TenantUnresolved(String),

    /// 透传共享库错误，避免在每个 match 分支手动转换
    #[error(transparent)]
    Shared(#[from] BridgeError),
}

/// 订单同步 Result 类型别名
pub type Result<T> = std::result::Result<T, OrderSyncError>;

impl OrderSyncError {
    /// 是否值得交给作业运行时重试
    ///
    /// 载荷非法和租户缺失在重试后结果不会改变，属于终态失败
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MalformedPayload { .. } | Self::TenantUnresolved(_) => false,
            Self::Shared(e) => e.is_retryable(),
        }
    }

    pub fn malformed(event_type: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedPayload {
            event_type: event_type.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<sqlx::Error> for OrderSyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::Shared(BridgeError::Database(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrderSyncError::malformed("checkout.session.completed", "missing field `id`");
        assert_eq!(
            err.to_string(),
            "事件载荷格式非法: checkout.session.completed - missing field `id`"
        );

        let err = OrderSyncError::TenantUnresolved("no company".to_string());
        assert_eq!(err.to_string(), "无法确定订单归属租户: no company");

        let err = OrderSyncError::Shared(BridgeError::Internal("boom".to_string()));
        assert_eq!(err.to_string(), "内部错误: boom");
    }

    #[test]
    fn test_is_retryable() {
        assert!(!OrderSyncError::malformed("customer.created", "bad").is_retryable());
        assert!(!OrderSyncError::TenantUnresolved("x".to_string()).is_retryable());
        assert!(OrderSyncError::from(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(
            !OrderSyncError::Shared(BridgeError::Internal("x".to_string())).is_retryable()
        );
    }
}
