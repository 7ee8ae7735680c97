use super::{EventAdmin, validate_criteria};
use crate::{
    context::AppContext, dto::Dto, error::AppError, query::{Query, QueryHandler},
};
use async_trait::async_trait;
use event_core::event_store::ReplayCriteria;
use event_core::eventing::{FailedEventEntry, RetryStatistics};
use event_core::persist::{EventRecord, EventStatistics};
use serde::Serialize;

impl Dto for EventStatistics {}
impl Dto for RetryStatistics {}

#[derive(Debug, Clone, Serialize)]
pub struct EventListDto {
    pub count: usize,
    pub events: Vec<EventRecord>,
}
impl Dto for EventListDto {}

impl From<Vec<EventRecord>> for EventListDto {
    fn from(events: Vec<EventRecord>) -> Self {
        Self {
            count: events.len(),
            events,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedEventsDto {
    pub count: usize,
    pub entries: Vec<FailedEventEntry>,
}
impl Dto for FailedEventsDto {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityDto {
    pub event_id: String,
    pub valid: bool,
}
impl Dto for IntegrityDto {}

#[derive(Debug, Clone, Default)]
pub struct GetEventStatistics;

impl Query for GetEventStatistics {
    const NAME: &'static str = "GetEventStatistics";
    type Dto = EventStatistics;
}

/// 按条件列出事件（序号升序）
#[derive(Debug, Clone, Default)]
pub struct ListEvents {
    pub criteria: ReplayCriteria,
}

impl Query for ListEvents {
    const NAME: &'static str = "ListEvents";
    type Dto = EventListDto;
}

/// 单个聚合（或全部）的事件流，按聚合版本升序
#[derive(Debug, Clone, Default)]
pub struct GetEventStream {
    pub aggregate_id: Option<String>,
    pub aggregate_type: Option<String>,
    pub from_version: Option<i64>,
    pub to_version: Option<i64>,
}

impl Query for GetEventStream {
    const NAME: &'static str = "GetEventStream";
    type Dto = EventListDto;
}

#[derive(Debug, Clone)]
pub struct VerifyEventIntegrity {
    pub event_id: String,
}

impl Query for VerifyEventIntegrity {
    const NAME: &'static str = "VerifyEventIntegrity";
    type Dto = IntegrityDto;
}

#[derive(Debug, Clone, Default)]
pub struct GetRetryStatistics;

impl Query for GetRetryStatistics {
    const NAME: &'static str = "GetRetryStatistics";
    type Dto = RetryStatistics;
}

#[derive(Debug, Clone, Default)]
pub struct ListFailedEvents;

impl Query for ListFailedEvents {
    const NAME: &'static str = "ListFailedEvents";
    type Dto = FailedEventsDto;
}

#[async_trait]
impl QueryHandler<GetEventStatistics> for EventAdmin {
    async fn handle(
        &self,
        _ctx: &AppContext,
        _q: GetEventStatistics,
    ) -> Result<EventStatistics, AppError> {
        Ok(self.store.get_statistics().await?)
    }
}

#[async_trait]
impl QueryHandler<ListEvents> for EventAdmin {
    async fn handle(&self, _ctx: &AppContext, q: ListEvents) -> Result<EventListDto, AppError> {
        validate_criteria(&q.criteria)?;
        let events = self.store.get_events_for_replay(&q.criteria).await?;
        Ok(events.into())
    }
}

#[async_trait]
impl QueryHandler<GetEventStream> for EventAdmin {
    async fn handle(&self, _ctx: &AppContext, q: GetEventStream) -> Result<EventListDto, AppError> {
        if let (Some(from), Some(to)) = (q.from_version, q.to_version) {
            if from > to {
                return Err(AppError::Validation(format!(
                    "from_version {from} is greater than to_version {to}"
                )));
            }
        }
        let events = self
            .store
            .get_event_stream(
                q.aggregate_id.as_deref(),
                q.aggregate_type.as_deref(),
                q.from_version,
                q.to_version,
            )
            .await?;
        Ok(events.into())
    }
}

#[async_trait]
impl QueryHandler<VerifyEventIntegrity> for EventAdmin {
    async fn handle(
        &self,
        _ctx: &AppContext,
        q: VerifyEventIntegrity,
    ) -> Result<IntegrityDto, AppError> {
        let valid = self.store.verify_integrity(&q.event_id).await?;
        if !valid {
            tracing::warn!(event_id = %q.event_id, "event content hash mismatch");
        }
        Ok(IntegrityDto {
            event_id: q.event_id,
            valid,
        })
    }
}

#[async_trait]
impl QueryHandler<GetRetryStatistics> for EventAdmin {
    async fn handle(
        &self,
        _ctx: &AppContext,
        _q: GetRetryStatistics,
    ) -> Result<RetryStatistics, AppError> {
        Ok(self.retry.get_retry_statistics())
    }
}

#[async_trait]
impl QueryHandler<ListFailedEvents> for EventAdmin {
    async fn handle(
        &self,
        _ctx: &AppContext,
        _q: ListFailedEvents,
    ) -> Result<FailedEventsDto, AppError> {
        let entries = self.retry.get_failed_events();
        Ok(FailedEventsDto {
            count: entries.len(),
            entries,
        })
    }
}
