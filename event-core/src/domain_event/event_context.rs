use bon::Builder;
use serde::{Deserialize, Serialize};

/// 存储事件时附带的链路与审计信息
#[derive(Builder, Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    /// 关联ID
    #[builder(into)]
    correlation_id: Option<String>,
    /// 因果ID
    #[builder(into)]
    causation_id: Option<String>,
    /// 操作用户；缺省时取事件自身的 `user_id`
    #[builder(into)]
    user_id: Option<String>,
    /// 会话ID
    #[builder(into)]
    session_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Value>,
}

impl EventContext {
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

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }
}
