use super::event_record::{EventRecord, EventStatus};
use crate::error::EventResult;
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 事件记录查询条件（各条件之间为 AND）
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize)]
pub struct RecordFilter {
    /// 发生时间下界（含）
    pub from: Option<DateTime<Utc>>,
    /// 发生时间上界（含）
    pub to: Option<DateTime<Utc>>,
    /// 发生时间严格早于
    pub occurred_before: Option<DateTime<Utc>>,
    #[builder(default)]
    #[serde(default)]
    pub event_types: Vec<String>,
    #[builder(default)]
    #[serde(default)]
    pub aggregate_ids: Vec<String>,
    #[builder(default)]
    #[serde(default)]
    pub aggregate_types: Vec<String>,
    #[builder(default)]
    #[serde(default)]
    pub statuses: Vec<EventStatus>,
    /// 聚合版本下界（含）
    pub from_version: Option<i64>,
    /// 聚合版本上界（含）
    pub to_version: Option<i64>,
}

impl RecordFilter {
    pub fn matches(&self, record: &EventRecord) -> bool {
        let occurred_at = record.occurred_at();
        if self.from.is_some_and(|from| occurred_at < from)
            || self.to.is_some_and(|to| occurred_at > to)
            || self.occurred_before.is_some_and(|before| occurred_at >= before)
        {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.iter().any(|t| t == record.event_type()) {
            return false;
        }
        if !self.aggregate_ids.is_empty()
            && !record
                .aggregate_id()
                .is_some_and(|id| self.aggregate_ids.iter().any(|a| a == id))
        {
            return false;
        }
        if !self.aggregate_types.is_empty()
            && !record
                .aggregate_type()
                .is_some_and(|ty| self.aggregate_types.iter().any(|a| a == ty))
        {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status()) {
            return false;
        }
        let version = record.aggregate_version();
        !(self.from_version.is_some_and(|v| version < v)
            || self.to_version.is_some_and(|v| version > v))
    }
}

/// 结果排序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordOrder {
    #[default]
    SequenceAsc,
    OccurredAtAsc,
    AggregateVersionAsc,
}

/// 分页参数；`limit` 为空表示不限
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }
}

/// 状态迁移
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    Processed {
        at: DateTime<Utc>,
    },
    Failed {
        at: DateTime<Utc>,
        error_message: String,
        retry_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
    },
    Replayed,
}

impl RecordChange {
    pub(crate) fn apply(&self, record: &mut EventRecord) {
        match self {
            RecordChange::Processed { at } => {
                record.status = EventStatus::Processed;
                record.processed_at = Some(*at);
            }
            RecordChange::Failed {
                at,
                error_message,
                retry_count,
                next_retry_at,
            } => {
                record.status = EventStatus::Failed;
                record.failed_at = Some(*at);
                record.error_message = Some(error_message.clone());
                record.retry_count = *retry_count;
                record.next_retry_at = *next_retry_at;
            }
            RecordChange::Replayed => {
                record.status = EventStatus::Replayed;
            }
        }
    }
}

/// 事件存储统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStatistics {
    pub total_events: u64,
    pub events_by_status: BTreeMap<String, u64>,
    pub events_by_type: BTreeMap<String, u64>,
    pub oldest_event: Option<DateTime<Utc>>,
    pub newest_event: Option<DateTime<Utc>>,
}

/// 事件记录仓储：事件存储服务消费的持久化接口
///
/// 实现需保证 `event_id` 唯一；重复写入返回 `EventError::DuplicateEvent`。
#[async_trait]
pub trait EventRecordRepository: Send + Sync {
    /// 写入新记录，返回带存储标识的记录
    async fn insert(&self, record: EventRecord) -> EventResult<EventRecord>;

    /// 序号最大的记录
    async fn find_latest(&self) -> EventResult<Option<EventRecord>>;

    async fn find_by_event_id(&self, event_id: &str) -> EventResult<Option<EventRecord>>;

    async fn find(
        &self,
        filter: &RecordFilter,
        order: RecordOrder,
        page: Page,
    ) -> EventResult<Vec<EventRecord>>;

    /// 按事件 ID 更新状态，返回受影响行数（不存在时为 0）
    async fn update(&self, event_id: &str, change: RecordChange) -> EventResult<u64>;

    /// 删除匹配的记录，返回删除条数
    async fn delete(&self, filter: &RecordFilter) -> EventResult<u64>;

    async fn statistics(&self) -> EventResult<EventStatistics>;
}
