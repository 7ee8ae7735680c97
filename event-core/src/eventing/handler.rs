//! 事件处理器（EventHandler）
//!
//! 定义消费某类/多类/全部事件的处理逻辑与元信息（名称、订阅类型），
//! 以及由闭包构造处理器的便捷函数 [`handler_fn`]。
//!
use crate::domain_event::DomainEvent;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandledEventType {
    One(String),
    Many(Vec<String>),
    All,
}

/// 事件处理器：处理某一类型的事件
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于重试键、死信与审计）
    fn handler_name(&self) -> &str;
    /// 返回该处理器支持的事件类型
    fn handled_event_type(&self) -> HandledEventType;
    /// 处理事件
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: EventHandler + ?Sized> EventHandler for Arc<T> {
    fn handler_name(&self) -> &str {
        (**self).handler_name()
    }

    fn handled_event_type(&self) -> HandledEventType {
        (**self).handled_event_type()
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        (**self).handle(event).await
    }
}

type HandlerFn = Box<dyn Fn(DomainEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub struct FnHandler {
    name: String,
    handled: HandledEventType,
    f: HandlerFn,
}

#[async_trait]
impl EventHandler for FnHandler {
    fn handler_name(&self) -> &str {
        &self.name
    }

    fn handled_event_type(&self) -> HandledEventType {
        self.handled.clone()
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}

/// 由异步闭包构造处理器
pub fn handler_fn<F, Fut>(name: impl Into<String>, handled: HandledEventType, f: F) -> FnHandler
where
    F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler {
        name: name.into(),
        handled,
        f: Box::new(move |event| Box::pin(f(event))),
    }
}
