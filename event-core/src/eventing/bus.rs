//! 事件总线（EventBus）协议
//!
//! 先持久化、再分发：发布路径上的存储失败直接向调用方返回，
//! 分发失败会把记录标记为 FAILED 后再以 `EventError::Delivery` 返回。
//!
use super::EventHandler;
use crate::domain_event::{DomainEvent, EventContext};
use crate::error::EventResult as Result;
use async_trait::async_trait;
use std::sync::Arc;

/// 事件总线：负责存储、分发事件与管理订阅
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: &DomainEvent, context: &EventContext) -> Result<()>;

    /// 依次发布，首个失败即中止（已发布的事件不回滚）
    async fn publish_all(&self, events: &[DomainEvent], context: &EventContext) -> Result<()> {
        for event in events {
            self.publish(event, context).await?;
        }
        Ok(())
    }

    /// 仅分发、不落库
    async fn publish_without_store(&self, event: &DomainEvent) -> Result<()>;

    fn subscribe(&self, channel: &str, handler: Arc<dyn EventHandler>);

    fn subscribe_to_all(&self, handler: Arc<dyn EventHandler>);
}
