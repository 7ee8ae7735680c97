//! 事件存储管理用例
//!
//! 以命令/查询的形式暴露事件存储与重试协调器的运维能力：统计、列表、聚合事件流、
//! 完整性校验、重放、清理，以及失败事件的查看、手动重试与清空。
//!
mod commands;
mod queries;

pub use commands::{
    CleanupEvents, CleanupResultDto, ClearFailedEvents, ClearFailedResultDto, ManualRetry,
    ManualRetryResultDto, ReplayEvents, ReplayResultDto,
};
pub use queries::{
    EventListDto, FailedEventsDto, GetEventStatistics, GetEventStream, GetRetryStatistics,
    IntegrityDto, ListEvents, ListFailedEvents, VerifyEventIntegrity,
};

use crate::{
    error::AppError, inmemory_command_bus::InMemoryCommandBus,
    inmemory_query_bus::InMemoryQueryBus,
};
use event_core::event_store::{EventStore, ReplayCriteria};
use event_core::eventing::{EventEngine, RetryCoordinator};
use std::sync::Arc;

/// 管理用例的处理器：同一实例实现全部命令/查询处理器
#[derive(Clone)]
pub struct EventAdmin {
    store: Arc<EventStore>,
    retry: Arc<RetryCoordinator>,
    default_retention_days: u32,
}

impl EventAdmin {
    pub fn new(
        store: Arc<EventStore>,
        retry: Arc<RetryCoordinator>,
        default_retention_days: u32,
    ) -> Self {
        Self {
            store,
            retry,
            default_retention_days,
        }
    }

    pub fn from_engine(engine: &EventEngine) -> Self {
        Self::new(
            engine.store().clone(),
            engine.retry().clone(),
            engine.config().default_retention_days,
        )
    }

    /// 把全部管理用例注册到给定的命令/查询总线
    pub fn register(
        self: &Arc<Self>,
        commands: &InMemoryCommandBus,
        queries: &InMemoryQueryBus,
    ) -> Result<(), AppError> {
        queries.register::<GetEventStatistics, _>(self.clone())?;
        queries.register::<ListEvents, _>(self.clone())?;
        queries.register::<GetEventStream, _>(self.clone())?;
        queries.register::<VerifyEventIntegrity, _>(self.clone())?;
        queries.register::<GetRetryStatistics, _>(self.clone())?;
        queries.register::<ListFailedEvents, _>(self.clone())?;

        commands.register::<ReplayEvents, _>(self.clone())?;
        commands.register::<CleanupEvents, _>(self.clone())?;
        commands.register::<ManualRetry, _>(self.clone())?;
        commands.register::<ClearFailedEvents, _>(self.clone())?;
        Ok(())
    }
}

pub(crate) fn validate_criteria(criteria: &ReplayCriteria) -> Result<(), AppError> {
    if let (Some(from), Some(to)) = (criteria.from_date, criteria.to_date) {
        if from > to {
            return Err(AppError::Validation(format!(
                "from_date {from} is after to_date {to}"
            )));
        }
    }
    if criteria.limit == Some(0) {
        return Err(AppError::Validation("limit must be positive".to_string()));
    }
    Ok(())
}
