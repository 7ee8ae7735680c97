//! 事件核心统一错误定义
//!
//! 聚焦序列化、事件记录仓储、投递与参数校验等最小必要集合，
//! 便于在各实现层统一转换为 `EventError`。
//!
//! 处理器（`EventHandler`）内部使用 `anyhow::Error`；若希望重试白名单按“错误类型名”匹配，
//! 可返回带类型名的 [`HandlerError`]。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EventError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },

    // --- 仓储/持久化 ---
    #[error("duplicate event: event_id={event_id}")]
    DuplicateEvent { event_id: String },
    #[error("event repository error: {reason}")]
    EventRepository { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },

    // --- 投递 ---
    #[error("event delivery failed: event_id={event_id}, reason={source}")]
    Delivery {
        event_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // --- 通用 ---
    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },
}

/// 统一 Result 类型别名
pub type EventResult<T> = Result<T, EventError>;

impl EventError {
    pub(crate) fn delivery(event_id: &str, err: anyhow::Error) -> Self {
        EventError::Delivery {
            event_id: event_id.to_string(),
            source: err.into(),
        }
    }
}

/// 处理器错误：携带稳定的错误类型名（如 `TimeoutError`），供重试白名单匹配
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    kind: String,
    message: String,
}

impl HandlerError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// 收集错误链上所有 `HandlerError` 的类型名
pub(crate) fn handler_error_kinds(err: &anyhow::Error) -> Vec<&str> {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<HandlerError>())
        .map(HandlerError::kind)
        .collect()
}

// ---- Cross-crate conversions for infrastructure convenience ----
// 允许在基础设施层直接使用 `?` 将 sqlx/uuid 等错误转换为 EventError

#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for EventError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EventError::NotFound {
                reason: "row not found".to_string(),
            },
            other => EventError::Database {
                reason: other.to_string(),
            },
        }
    }
}

impl From<uuid::Error> for EventError {
    fn from(err: uuid::Error) -> Self {
        EventError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for EventError {
    fn from(err: chrono::ParseError) -> Self {
        EventError::Parse {
            reason: err.to_string(),
        }
    }
}
