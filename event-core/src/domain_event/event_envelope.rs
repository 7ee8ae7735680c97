use super::event_payload::{EventPayload, PayloadMap};
use crate::error::EventResult;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 领域事件信封：所有具体事件共享的身份、聚合与时间信息
///
/// 具体事件的类型化字段扁平化存放在 `metadata` 中（见 [`EventPayload`]）。
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct DomainEvent {
    /// 事件唯一标识符（默认 UUID v4）
    #[builder(default = Uuid::new_v4().to_string(), into)]
    event_id: String,
    /// 事件类型，同时作为订阅通道名
    #[builder(into)]
    event_type: String,
    /// 聚合 ID
    #[builder(into)]
    aggregate_id: Option<String>,
    /// 聚合类型
    #[builder(into)]
    aggregate_type: Option<String>,
    /// 聚合版本
    #[builder(default = 1)]
    #[serde(default = "default_aggregate_version")]
    aggregate_version: i64,
    /// 事件发生时间
    #[builder(default = Utc::now())]
    occurred_at: DateTime<Utc>,
    /// 触发事件的用户
    #[builder(into)]
    user_id: Option<String>,
    /// 开放的键值负载
    metadata: Option<PayloadMap>,
}

fn default_aggregate_version() -> i64 {
    1
}

impl DomainEvent {
    /// 由类型化负载构造事件信封
    pub fn from_payload<P: EventPayload>(payload: &P) -> EventResult<Self> {
        Ok(Self::builder()
            .event_type(payload.event_type())
            .maybe_aggregate_id(payload.aggregate_id())
            .maybe_aggregate_type(P::aggregate_type())
            .metadata(payload.to_metadata()?)
            .build())
    }

    /// 还原类型化负载
    pub fn payload<P: EventPayload>(&self) -> EventResult<P> {
        match &self.metadata {
            Some(metadata) => P::from_metadata(&self.event_type, metadata),
            None => P::from_metadata(&self.event_type, &PayloadMap::new()),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_aggregate_version(mut self, aggregate_version: i64) -> Self {
        self.aggregate_version = aggregate_version;
        self
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

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn metadata(&self) -> Option<&PayloadMap> {
        self.metadata.as_ref()
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }

    /// 去除身份/聚合/时间字段后的事件数据（持久化为 `event_data`）
    pub fn event_data(&self) -> Value {
        let mut data = PayloadMap::new();
        data.insert(
            "event_type".to_string(),
            Value::String(self.event_type.clone()),
        );
        if let Some(user_id) = &self.user_id {
            data.insert("user_id".to_string(), Value::String(user_id.clone()));
        }
        if let Some(metadata) = &self.metadata {
            data.insert("metadata".to_string(), Value::Object(metadata.clone()));
        }
        Value::Object(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_fills_identity_defaults() {
        let event = DomainEvent::builder().event_type("booking.created").build();

        assert!(Uuid::parse_str(event.event_id()).is_ok());
        assert_eq!(event.aggregate_version(), 1);
        assert!(event.aggregate_id().is_none());
        assert!(event.metadata().is_none());
    }

    #[test]
    fn event_data_strips_identity_and_aggregate_fields() {
        let mut metadata = PayloadMap::new();
        metadata.insert("booking_id".into(), json!("b-1"));
        let event = DomainEvent::builder()
            .event_id("e-1")
            .event_type("booking.created")
            .aggregate_id("b-1")
            .aggregate_type("booking")
            .aggregate_version(3)
            .user_id("u-1")
            .metadata(metadata)
            .build();

        assert_eq!(
            event.event_data(),
            json!({
                "event_type": "booking.created",
                "user_id": "u-1",
                "metadata": { "booking_id": "b-1" }
            })
        );
    }
}
