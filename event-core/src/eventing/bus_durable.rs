//! 持久化事件总线
//!
use super::{EventBus, EventDispatcher, EventHandler};
use crate::domain_event::{DomainEvent, EventContext};
use crate::error::{EventError, EventResult};
use crate::event_store::EventStore;
use async_trait::async_trait;
use std::sync::Arc;

/// 基于 [`EventStore`] 与 [`EventDispatcher`] 的总线实现
#[derive(Clone)]
pub struct DurableEventBus {
    store: Arc<EventStore>,
    dispatcher: Arc<EventDispatcher>,
}

impl DurableEventBus {
    pub fn new(store: Arc<EventStore>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    async fn dispatch_and_mark(&self, event: &DomainEvent) -> anyhow::Result<()> {
        self.dispatcher.deliver(event).await?;
        self.store.mark_event_as_processed(event.event_id()).await?;
        Ok(())
    }
}

#[async_trait]
impl EventBus for DurableEventBus {
    async fn publish(&self, event: &DomainEvent, context: &EventContext) -> EventResult<()> {
        self.store
            .store_event(event, event.event_type(), context)
            .await?;

        match self.dispatch_and_mark(event).await {
            Ok(()) => {
                tracing::debug!(
                    event_id = event.event_id(),
                    event_type = event.event_type(),
                    "event published"
                );
                Ok(())
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::error!(
                    event_id = event.event_id(),
                    event_type = event.event_type(),
                    error = %message,
                    "event publish failed"
                );
                if let Err(mark_err) = self
                    .store
                    .mark_event_as_failed(event.event_id(), &message, 0, None)
                    .await
                {
                    tracing::error!(
                        event_id = event.event_id(),
                        error = %mark_err,
                        "failed to mark event as failed"
                    );
                }
                Err(EventError::delivery(event.event_id(), err))
            }
        }
    }

    async fn publish_without_store(&self, event: &DomainEvent) -> EventResult<()> {
        self.dispatcher
            .deliver(event)
            .await
            .map_err(|err| EventError::delivery(event.event_id(), err))
    }

    fn subscribe(&self, channel: &str, handler: Arc<dyn EventHandler>) {
        self.dispatcher.subscribe(channel, handler);
    }

    fn subscribe_to_all(&self, handler: Arc<dyn EventHandler>) {
        self.dispatcher.subscribe_to_all(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventing::{HandledEventType, handler_fn};
    use crate::persist::{EventStatus, InMemoryEventRecordRepository};
    use std::sync::Mutex;

    fn bus() -> (DurableEventBus, Arc<InMemoryEventRecordRepository>) {
        let repo = Arc::new(InMemoryEventRecordRepository::new());
        let dispatcher = Arc::new(EventDispatcher::new());
        let store = Arc::new(
            EventStore::builder()
                .repository(repo.clone())
                .dispatcher(dispatcher.clone())
                .build(),
        );
        (DurableEventBus::new(store, dispatcher), repo)
    }

    #[tokio::test]
    async fn publish_stores_then_marks_processed() {
        let (bus, repo) = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(
            "desk.booked",
            Arc::new(handler_fn("notify", HandledEventType::All, move |event| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(event.event_id().to_string());
                    Ok(())
                }
            })),
        );

        let event = DomainEvent::builder().event_id("e-1").event_type("desk.booked").build();
        bus.publish(&event, &EventContext::default()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["e-1"]);
        let records = repo.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status(), EventStatus::Processed);
        assert!(records[0].processed_at().is_some());
    }

    #[tokio::test]
    async fn handler_failure_marks_failed_and_surfaces_delivery_error() {
        let (bus, repo) = bus();
        bus.subscribe_to_all(Arc::new(handler_fn(
            "projection",
            HandledEventType::All,
            |_event| async { anyhow::bail!("projection offline") },
        )));

        let event = DomainEvent::builder().event_id("e-2").event_type("desk.booked").build();
        let err = bus.publish(&event, &EventContext::default()).await.unwrap_err();

        assert!(matches!(err, EventError::Delivery { ref event_id, .. } if event_id == "e-2"));
        let records = repo.records().await;
        assert_eq!(records[0].status(), EventStatus::Failed);
        assert_eq!(records[0].error_message(), Some("projection offline"));
        assert_eq!(records[0].retry_count(), 0);
    }

    #[tokio::test]
    async fn publish_all_stops_at_first_failure() {
        let (bus, repo) = bus();
        let first = DomainEvent::builder().event_id("dup").event_type("desk.booked").build();
        let events = vec![first.clone(), first, DomainEvent::builder().event_type("desk.booked").build()];

        let err = bus.publish_all(&events, &EventContext::default()).await.unwrap_err();

        assert!(matches!(err, EventError::DuplicateEvent { .. }));
        assert_eq!(repo.records().await.len(), 1);
    }

    #[tokio::test]
    async fn publish_without_store_skips_persistence() {
        let (bus, repo) = bus();
        let event = DomainEvent::builder().event_type("desk.released").build();

        bus.publish_without_store(&event).await.unwrap();

        assert!(repo.records().await.is_empty());
    }
}
