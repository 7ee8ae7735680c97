//! 事件记录（EventRecord）
//!
//! 领域事件在持久化层的标准形态：事件身份、去身份化的事件数据、链路信息、
//! 处理状态机、内容摘要与全局序号。
//!
use crate::{
    domain_event::{DomainEvent, PayloadMap},
    error::{EventError, EventResult},
};
use bon::Builder;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// 事件记录的处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Processed,
    Failed,
    Replayed,
}

impl EventStatus {
    pub const ALL: [EventStatus; 4] = [
        EventStatus::Pending,
        EventStatus::Processed,
        EventStatus::Failed,
        EventStatus::Replayed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Processed => "PROCESSED",
            EventStatus::Failed => "FAILED",
            EventStatus::Replayed => "REPLAYED",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EventStatus::Pending),
            "PROCESSED" => Ok(EventStatus::Processed),
            "FAILED" => Ok(EventStatus::Failed),
            "REPLAYED" => Ok(EventStatus::Replayed),
            other => Err(EventError::Parse {
                reason: format!("unknown event status: {other}"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct EventRecord {
    /// 存储层分配的标识（写入前为 0）
    #[builder(default)]
    pub(crate) id: i64,
    pub(crate) event_id: String,
    pub(crate) event_type: String,
    pub(crate) aggregate_id: Option<String>,
    pub(crate) aggregate_type: Option<String>,
    pub(crate) aggregate_version: i64,
    /// 去除身份/聚合/时间字段后的事件数据
    pub(crate) event_data: Value,
    pub(crate) metadata: Option<Value>,
    pub(crate) correlation_id: Option<String>,
    pub(crate) causation_id: Option<String>,
    pub(crate) user_id: Option<String>,
    pub(crate) session_id: Option<String>,
    #[builder(default = EventStatus::Pending)]
    pub(crate) status: EventStatus,
    pub(crate) processed_at: Option<DateTime<Utc>>,
    pub(crate) failed_at: Option<DateTime<Utc>>,
    pub(crate) error_message: Option<String>,
    #[builder(default)]
    pub(crate) retry_count: i32,
    pub(crate) next_retry_at: Option<DateTime<Utc>>,
    pub(crate) occurred_at: DateTime<Utc>,
    pub(crate) content_hash: String,
    /// 写入时最近一条记录的存储标识
    pub(crate) previous_event_id: Option<i64>,
    pub(crate) sequence_number: i64,
    #[builder(default = Utc::now())]
    pub(crate) created_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_id(&self) -> Option<&str> {
        self.aggregate_id.as_deref()
    }

    pub fn aggregate_type(&self) -> Option<&str> {
        self.aggregate_type.as_deref()
    }

    pub fn aggregate_version(&self) -> i64 {
        self.aggregate_version
    }

    pub fn event_data(&self) -> &Value {
        &self.event_data
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        self.failed_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn retry_count(&self) -> i32 {
        self.retry_count
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.next_retry_at
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn previous_event_id(&self) -> Option<i64> {
        self.previous_event_id
    }

    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// 依据当前字段重新计算摘要并与存储值比较
    pub fn verify_content_hash(&self) -> bool {
        let expected = content_hash(
            &self.event_id,
            &self.event_type,
            self.aggregate_id.as_deref(),
            self.aggregate_type.as_deref(),
            &self.event_data,
            self.occurred_at,
        );
        expected == self.content_hash
    }

    /// 将存储的事件数据合并回身份字段，重建领域事件
    pub fn to_domain_event(&self) -> EventResult<DomainEvent> {
        let mut data = match &self.event_data {
            Value::Object(map) => map.clone(),
            Value::Null => PayloadMap::new(),
            other => {
                return Err(EventError::TypeMismatch {
                    expected: "object".to_string(),
                    found: other.to_string(),
                });
            }
        };

        data.entry("event_type")
            .or_insert_with(|| Value::String(self.event_type.clone()));
        if let Some(user_id) = &self.user_id {
            data.entry("user_id")
                .or_insert_with(|| Value::String(user_id.clone()));
        }
        data.insert("event_id".to_string(), json!(self.event_id));
        data.insert("aggregate_id".to_string(), json!(self.aggregate_id));
        data.insert("aggregate_type".to_string(), json!(self.aggregate_type));
        data.insert(
            "aggregate_version".to_string(),
            json!(self.aggregate_version),
        );
        data.insert(
            "occurred_at".to_string(),
            serde_json::to_value(self.occurred_at)?,
        );

        Ok(serde_json::from_value(Value::Object(data))?)
    }
}

/// 内容摘要：SHA-256(JSON{事件ID, 类型, 聚合ID, 聚合类型, 事件数据, 发生时间}) 的十六进制串
///
/// 发生时间按微秒精度格式化，与 Postgres `TIMESTAMPTZ` 的存储精度一致：
/// 入库前后校验结果相同，而相差一毫秒以内的两个时间点仍得到不同摘要。
pub fn content_hash(
    event_id: &str,
    event_type: &str,
    aggregate_id: Option<&str>,
    aggregate_type: Option<&str>,
    event_data: &Value,
    occurred_at: DateTime<Utc>,
) -> String {
    let content = json!({
        "eventId": event_id,
        "eventType": event_type,
        "aggregateId": aggregate_id,
        "aggregateType": aggregate_type,
        "eventData": event_data,
        "occurredAt": occurred_at.to_rfc3339_opts(SecondsFormat::Micros, true),
    });
    format!("{:x}", Sha256::digest(content.to_string().as_bytes()))
}
