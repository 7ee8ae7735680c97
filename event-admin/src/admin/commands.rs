use super::{EventAdmin, validate_criteria};
use crate::{
    command::{Command, CommandHandler}, context::AppContext, dto::Dto,
    error::AppError,
};
use async_trait::async_trait;
use event_core::event_store::ReplayCriteria;
use serde::Serialize;

/// 按条件重放已存储的事件
#[derive(Debug, Clone, Default)]
pub struct ReplayEvents {
    pub criteria: ReplayCriteria,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayResultDto {
    pub replayed_count: usize,
    pub failed_count: usize,
    pub message: String,
}
impl Dto for ReplayResultDto {}

impl Command for ReplayEvents {
    const NAME: &'static str = "ReplayEvents";
    type Output = ReplayResultDto;
}

/// 清理超过保留期的已处理事件；未给出天数时使用默认保留期
#[derive(Debug, Clone, Default)]
pub struct CleanupEvents {
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupResultDto {
    pub deleted_count: u64,
    pub message: String,
}
impl Dto for CleanupResultDto {}

impl Command for CleanupEvents {
    const NAME: &'static str = "CleanupEvents";
    type Output = CleanupResultDto;
}

/// 立即重试失败表中的一个条目（键为 `{event_id}-{handler}`）
#[derive(Debug, Clone)]
pub struct ManualRetry {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualRetryResultDto {
    pub key: String,
    pub retried: bool,
}
impl Dto for ManualRetryResultDto {}

impl Command for ManualRetry {
    const NAME: &'static str = "ManualRetry";
    type Output = ManualRetryResultDto;
}

#[derive(Debug, Clone, Default)]
pub struct ClearFailedEvents;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearFailedResultDto {
    pub cleared_count: usize,
}
impl Dto for ClearFailedResultDto {}

impl Command for ClearFailedEvents {
    const NAME: &'static str = "ClearFailedEvents";
    type Output = ClearFailedResultDto;
}

#[async_trait]
impl CommandHandler<ReplayEvents> for EventAdmin {
    async fn handle(&self, ctx: &AppContext, cmd: ReplayEvents) -> Result<ReplayResultDto, AppError> {
        validate_criteria(&cmd.criteria)?;
        tracing::info!(operator = ctx.operator(), "replay requested");

        let outcome = self.store.replay_events(&cmd.criteria).await?;
        Ok(ReplayResultDto {
            replayed_count: outcome.replayed,
            failed_count: outcome.failed,
            message: format!(
                "Successfully replayed {} events ({} failed)",
                outcome.replayed, outcome.failed
            ),
        })
    }
}

#[async_trait]
impl CommandHandler<CleanupEvents> for EventAdmin {
    async fn handle(
        &self,
        ctx: &AppContext,
        cmd: CleanupEvents,
    ) -> Result<CleanupResultDto, AppError> {
        let retention_days = cmd.retention_days.unwrap_or(self.default_retention_days);
        if retention_days == 0 {
            return Err(AppError::Validation(
                "retention_days must be at least 1".to_string(),
            ));
        }
        tracing::info!(operator = ctx.operator(), retention_days, "cleanup requested");

        let deleted_count = self.store.cleanup_old_events(retention_days).await?;
        Ok(CleanupResultDto {
            deleted_count,
            message: format!(
                "Successfully deleted {deleted_count} old events (older than {retention_days} days)"
            ),
        })
    }
}

#[async_trait]
impl CommandHandler<ManualRetry> for EventAdmin {
    async fn handle(
        &self,
        ctx: &AppContext,
        cmd: ManualRetry,
    ) -> Result<ManualRetryResultDto, AppError> {
        if cmd.key.trim().is_empty() {
            return Err(AppError::Validation("retry key must not be empty".to_string()));
        }
        tracing::info!(operator = ctx.operator(), key = %cmd.key, "manual retry requested");

        let retried = self.retry.manual_retry(&cmd.key).await;
        Ok(ManualRetryResultDto {
            key: cmd.key,
            retried,
        })
    }
}

#[async_trait]
impl CommandHandler<ClearFailedEvents> for EventAdmin {
    async fn handle(
        &self,
        ctx: &AppContext,
        _cmd: ClearFailedEvents,
    ) -> Result<ClearFailedResultDto, AppError> {
        tracing::warn!(operator = ctx.operator(), "clearing failed events");
        Ok(ClearFailedResultDto {
            cleared_count: self.retry.clear_failed_events(),
        })
    }
}
