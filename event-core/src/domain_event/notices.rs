use super::event_envelope::DomainEvent;
use super::event_payload::PayloadMap;
use crate::error::{EventError, EventResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 通用领域事件通道：每次发布在具体类型通道之后触发
pub const DOMAIN_EVENT_CHANNEL: &str = "domain.event";
/// 死信通知通道
pub const DEAD_LETTER_CHANNEL: &str = "event.dead_letter";
/// 处理器错误通知通道
pub const HANDLER_ERROR_CHANNEL: &str = "event.handler.error";

/// 死信通知：某个 (事件, 处理器) 组合已放弃重试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterNotice {
    pub event_id: String,
    pub event_type: String,
    pub handler: String,
    pub error: String,
    pub error_detail: String,
    pub retry_count: u32,
    pub original_event: DomainEvent,
    pub timestamp: DateTime<Utc>,
}

/// 处理器错误通知：被包装的处理器执行失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerErrorNotice {
    pub handler: String,
    pub event_type: String,
    pub event_id: String,
    pub error: String,
    pub error_detail: String,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterNotice {
    pub fn to_event(&self) -> EventResult<DomainEvent> {
        notice_event(DEAD_LETTER_CHANNEL, self)
    }

    pub fn from_event(event: &DomainEvent) -> EventResult<Self> {
        notice_from_event(DEAD_LETTER_CHANNEL, event)
    }
}

impl HandlerErrorNotice {
    pub fn to_event(&self) -> EventResult<DomainEvent> {
        notice_event(HANDLER_ERROR_CHANNEL, self)
    }

    pub fn from_event(event: &DomainEvent) -> EventResult<Self> {
        notice_from_event(HANDLER_ERROR_CHANNEL, event)
    }
}

fn notice_event<T: Serialize>(channel: &str, notice: &T) -> EventResult<DomainEvent> {
    let metadata = match serde_json::to_value(notice)? {
        Value::Object(map) => map,
        other => {
            return Err(EventError::TypeMismatch {
                expected: "object".to_string(),
                found: other.to_string(),
            });
        }
    };
    Ok(DomainEvent::builder()
        .event_type(channel)
        .metadata(metadata)
        .build())
}

fn notice_from_event<T: DeserializeOwned>(channel: &str, event: &DomainEvent) -> EventResult<T> {
    if event.event_type() != channel {
        return Err(EventError::TypeMismatch {
            expected: channel.to_string(),
            found: event.event_type().to_string(),
        });
    }
    let metadata = event.metadata().cloned().unwrap_or_else(PayloadMap::new);
    Ok(serde_json::from_value(Value::Object(metadata))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_letter_notice_travels_on_its_channel() {
        let original = DomainEvent::builder()
            .event_id("e-9")
            .event_type("payment.completed")
            .build();
        let notice = DeadLetterNotice {
            event_id: "e-9".into(),
            event_type: "payment.completed".into(),
            handler: "wallet".into(),
            error: "ConnectionError: refused".into(),
            error_detail: "ConnectionError: refused".into(),
            retry_count: 4,
            original_event: original,
            timestamp: Utc::now(),
        };

        let event = notice.to_event().unwrap();
        assert_eq!(event.event_type(), DEAD_LETTER_CHANNEL);
        assert_eq!(DeadLetterNotice::from_event(&event).unwrap(), notice);
        assert!(HandlerErrorNotice::from_event(&event).is_err());
    }
}
