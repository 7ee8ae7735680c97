//! 事件分发器（EventDispatcher）
//!
//! 进程内的发布/订阅核心：通道名到有序处理器列表的映射，外加一份订阅全部事件的列表。
//! - 同一通道的处理器按注册顺序依次执行；
//! - 首个失败即中止本次分发并返回该错误；
//! - `deliver` 先分发到事件类型通道，再分发到通用的 `domain.event`。
//!
use super::handler::{EventHandler, HandledEventType};
use crate::domain_event::{DOMAIN_EVENT_CHANNEL, DomainEvent};
use dashmap::DashMap;
use std::sync::Arc;

/// 订阅键：具体通道，或订阅全部事件
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Subscription {
    Channel(String),
    All,
}

#[derive(Default)]
pub struct EventDispatcher {
    registry: DashMap<Subscription, Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handlers(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        let dispatcher = Self::new();
        for h in handlers {
            dispatcher.register(h);
        }
        dispatcher
    }

    /// 按处理器声明的事件类型注册
    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        match handler.handled_event_type() {
            HandledEventType::All => self.subscribe_to_all(handler),
            HandledEventType::One(t) => self.subscribe(t, handler),
            HandledEventType::Many(ts) => {
                for t in ts {
                    self.subscribe(t, handler.clone());
                }
            }
        }
    }

    pub fn subscribe(&self, channel: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.registry
            .entry(Subscription::Channel(channel.into()))
            .or_default()
            .push(handler);
    }

    pub fn subscribe_to_all(&self, handler: Arc<dyn EventHandler>) {
        self.registry.entry(Subscription::All).or_default().push(handler);
    }

    /// 某通道当前的处理器快照（`domain.event` 通道包含订阅全部事件的处理器）
    pub fn handlers_for(&self, channel: &str) -> Vec<Arc<dyn EventHandler>> {
        let mut merged = self.snapshot(&Subscription::Channel(channel.to_string()));
        if channel == DOMAIN_EVENT_CHANNEL {
            merged.extend(self.snapshot(&Subscription::All));
        }
        merged
    }

    fn snapshot(&self, key: &Subscription) -> Vec<Arc<dyn EventHandler>> {
        self.registry
            .get(key)
            .map(|list| list.value().clone())
            .unwrap_or_default()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.handlers_for(channel).len()
    }

    /// 将事件分发到指定通道
    pub async fn emit(&self, channel: &str, event: &DomainEvent) -> anyhow::Result<()> {
        // 先取快照再执行，分片锁不跨 await 持有，处理器内部可继续订阅
        for h in self.handlers_for(channel) {
            tracing::trace!(channel, handler = h.handler_name(), event_id = event.event_id(), "dispatching event");
            h.handle(event).await?;
        }
        Ok(())
    }

    /// 分发到事件类型通道，随后分发到 `domain.event`
    pub async fn deliver(&self, event: &DomainEvent) -> anyhow::Result<()> {
        self.emit(event.event_type(), event).await?;
        self.emit(DOMAIN_EVENT_CHANNEL, event).await
    }
}
