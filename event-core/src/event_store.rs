//! 事件存储服务（EventStore）
//!
//! 在 `EventRecordRepository` 之上编排追加写入的事件日志：
//! - 写入时计算内容摘要、分配全局序号并链接上一条记录；
//! - 维护 PENDING → PROCESSED / FAILED → REPLAYED 的状态机；
//! - 提供回放、按聚合读取事件流、统计、保留期清理与完整性校验。
//!
//! 序号分配为“读取最大值再加一”，仅在单写入者前提下保证连续；
//! Postgres 实现的唯一约束会把并发冲突转换为写入错误。
//!
use crate::domain_event::{DomainEvent, EventContext};
use crate::error::{EventError, EventResult};
use crate::eventing::EventDispatcher;
use crate::persist::{
    EventRecord, EventRecordRepository, EventStatistics, EventStatus, Page, RecordChange,
    RecordFilter, RecordOrder, content_hash,
};
use bon::Builder;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_REPLAY_LIMIT: usize = 1000;
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// 回放/列表查询条件
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize)]
pub struct ReplayCriteria {
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
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
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ReplayCriteria {
    /// 仅给出一端时，另一端分别补为纪元起点/当前时间
    pub fn to_filter(&self) -> RecordFilter {
        let (from, to) = if self.from_date.is_some() || self.to_date.is_some() {
            (
                Some(self.from_date.unwrap_or_default()),
                Some(self.to_date.unwrap_or_else(Utc::now)),
            )
        } else {
            (None, None)
        };

        RecordFilter {
            from,
            to,
            event_types: self.event_types.clone(),
            aggregate_ids: self.aggregate_ids.clone(),
            aggregate_types: self.aggregate_types.clone(),
            statuses: self.statuses.clone(),
            ..Default::default()
        }
    }

    fn page(&self, default_limit: usize) -> Page {
        Page::new(
            self.limit.unwrap_or(default_limit),
            self.offset.unwrap_or_default(),
        )
    }

    /// 重放不套用默认条数，未给 limit 时处理全部匹配记录
    fn replay_page(&self) -> Page {
        Page {
            limit: self.limit,
            offset: self.offset.unwrap_or_default(),
        }
    }
}

/// 回放结果计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub replayed: usize,
    pub failed: usize,
}

#[derive(Builder)]
pub struct EventStore {
    repository: Arc<dyn EventRecordRepository>,
    dispatcher: Arc<EventDispatcher>,
    #[builder(default = DEFAULT_REPLAY_LIMIT)]
    default_replay_limit: usize,
}

impl EventStore {
    pub fn repository(&self) -> &Arc<dyn EventRecordRepository> {
        &self.repository
    }

    /// 追加一条 PENDING 记录
    pub async fn store_event(
        &self,
        event: &DomainEvent,
        event_type: &str,
        context: &EventContext,
    ) -> EventResult<EventRecord> {
        let event_data = event.event_data();
        let hash = content_hash(
            event.event_id(),
            event_type,
            event.aggregate_id(),
            event.aggregate_type(),
            &event_data,
            event.occurred_at(),
        );

        let result = async {
            let previous = self.repository.find_latest().await?;
            let sequence_number = previous.as_ref().map_or(0, |r| r.sequence_number()) + 1;

            let record = EventRecord::builder()
                .event_id(event.event_id().to_string())
                .event_type(event_type.to_string())
                .maybe_aggregate_id(event.aggregate_id().map(str::to_string))
                .maybe_aggregate_type(event.aggregate_type().map(str::to_string))
                .aggregate_version(event.aggregate_version())
                .event_data(event_data)
                .maybe_metadata(context.metadata().cloned())
                .maybe_correlation_id(context.correlation_id().map(str::to_string))
                .maybe_causation_id(context.causation_id().map(str::to_string))
                .maybe_user_id(context.user_id().or(event.user_id()).map(str::to_string))
                .maybe_session_id(context.session_id().map(str::to_string))
                .occurred_at(event.occurred_at())
                .content_hash(hash)
                .maybe_previous_event_id(previous.map(|r| r.id()))
                .sequence_number(sequence_number)
                .build();

            self.repository.insert(record).await
        }
        .await;

        match &result {
            Ok(record) => tracing::debug!(
                event_id = record.event_id(),
                event_type,
                sequence_number = record.sequence_number(),
                "event stored"
            ),
            Err(err) => tracing::error!(
                event_id = event.event_id(),
                event_type,
                error = %err,
                "failed to store event"
            ),
        }
        result
    }

    pub async fn mark_event_as_processed(&self, event_id: &str) -> EventResult<()> {
        let affected = self
            .repository
            .update(event_id, RecordChange::Processed { at: Utc::now() })
            .await?;
        tracing::debug!(event_id, affected, "event marked as processed");
        Ok(())
    }

    pub async fn mark_event_as_failed(
        &self,
        event_id: &str,
        error_message: &str,
        retry_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> EventResult<()> {
        let affected = self
            .repository
            .update(
                event_id,
                RecordChange::Failed {
                    at: Utc::now(),
                    error_message: error_message.to_string(),
                    retry_count,
                    next_retry_at,
                },
            )
            .await?;
        tracing::warn!(event_id, affected, error = error_message, "event marked as failed");
        Ok(())
    }

    /// 按序号升序返回匹配的记录，默认最多 1000 条
    pub async fn get_events_for_replay(
        &self,
        criteria: &ReplayCriteria,
    ) -> EventResult<Vec<EventRecord>> {
        self.repository
            .find(
                &criteria.to_filter(),
                RecordOrder::SequenceAsc,
                criteria.page(self.default_replay_limit),
            )
            .await
    }

    /// 按聚合版本升序返回事件流；只给出一端版本时，下界默认 1、上界不限
    pub async fn get_event_stream(
        &self,
        aggregate_id: Option<&str>,
        aggregate_type: Option<&str>,
        from_version: Option<i64>,
        to_version: Option<i64>,
    ) -> EventResult<Vec<EventRecord>> {
        let from_version = match (from_version, to_version) {
            (None, Some(_)) => Some(1),
            (from, _) => from,
        };
        let filter = RecordFilter {
            aggregate_ids: aggregate_id.map(|id| vec![id.to_string()]).unwrap_or_default(),
            aggregate_types: aggregate_type
                .map(|ty| vec![ty.to_string()])
                .unwrap_or_default(),
            from_version,
            to_version,
            ..Default::default()
        };
        self.repository
            .find(&filter, RecordOrder::AggregateVersionAsc, Page::all())
            .await
    }

    /// 重新分发匹配的记录（不再写入），逐条标记 REPLAYED；单条失败只计数不中止
    pub async fn replay_events(&self, criteria: &ReplayCriteria) -> EventResult<ReplayOutcome> {
        let records = self
            .repository
            .find(
                &criteria.to_filter(),
                RecordOrder::OccurredAtAsc,
                criteria.replay_page(),
            )
            .await?;

        let mut outcome = ReplayOutcome::default();
        for record in &records {
            match self.replay_one(record).await {
                Ok(()) => outcome.replayed += 1,
                Err(err) => {
                    outcome.failed += 1;
                    tracing::error!(
                        event_id = record.event_id(),
                        event_type = record.event_type(),
                        error = %err,
                        "failed to replay event"
                    );
                }
            }
        }

        tracing::info!(
            replayed = outcome.replayed,
            failed = outcome.failed,
            "event replay completed"
        );
        Ok(outcome)
    }

    async fn replay_one(&self, record: &EventRecord) -> EventResult<()> {
        let event = record.to_domain_event()?;
        self.dispatcher
            .deliver(&event)
            .await
            .map_err(|err| EventError::delivery(record.event_id(), err))?;
        self.repository
            .update(record.event_id(), RecordChange::Replayed)
            .await?;
        Ok(())
    }

    pub async fn get_statistics(&self) -> EventResult<EventStatistics> {
        self.repository.statistics().await
    }

    /// 删除早于保留期且已处理的记录；其它状态无论多旧都保留
    pub async fn cleanup_old_events(&self, retention_days: u32) -> EventResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let filter = RecordFilter {
            occurred_before: Some(cutoff),
            statuses: vec![EventStatus::Processed],
            ..Default::default()
        };
        let deleted = self.repository.delete(&filter).await?;
        tracing::info!(deleted, retention_days, %cutoff, "old events cleaned up");
        Ok(deleted)
    }

    /// 重新计算存储记录的内容摘要
    pub async fn verify_integrity(&self, event_id: &str) -> EventResult<bool> {
        let record = self
            .repository
            .find_by_event_id(event_id)
            .await?
            .ok_or_else(|| EventError::NotFound {
                reason: format!("event {event_id}"),
            })?;
        let valid = record.verify_content_hash();
        if !valid {
            tracing::warn!(event_id, "content hash mismatch");
        }
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventing::{HandledEventType, handler_fn};
    use crate::persist::InMemoryEventRecordRepository;
    use async_trait::async_trait;
    use serde_json::json;

    fn store_with(repo: Arc<dyn EventRecordRepository>) -> (EventStore, Arc<EventDispatcher>) {
        let dispatcher = Arc::new(EventDispatcher::new());
        let store = EventStore::builder()
            .repository(repo)
            .dispatcher(dispatcher.clone())
            .build();
        (store, dispatcher)
    }

    fn booking(id: &str, version: i64) -> DomainEvent {
        DomainEvent::builder()
            .event_id(id)
            .event_type("booking.created")
            .aggregate_id("b-1")
            .aggregate_type("booking")
            .aggregate_version(version)
            .build()
    }

    #[tokio::test]
    async fn sequential_stores_are_numbered_and_linked() {
        let (store, _) = store_with(Arc::new(InMemoryEventRecordRepository::new()));
        let ctx = EventContext::default();

        let mut records = Vec::new();
        for i in 1..=5 {
            let event = booking(&format!("e-{i}"), i);
            records.push(store.store_event(&event, "booking.created", &ctx).await.unwrap());
        }

        let seqs: Vec<i64> = records.iter().map(|r| r.sequence_number()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(records[0].previous_event_id(), None);
        for pair in records.windows(2) {
            assert_eq!(pair[1].previous_event_id(), Some(pair[0].id()));
        }
        assert!(records.iter().all(|r| r.status() == EventStatus::Pending));
    }

    #[tokio::test]
    async fn context_fields_and_user_fallback_are_persisted() {
        let (store, _) = store_with(Arc::new(InMemoryEventRecordRepository::new()));
        let event = booking("e-1", 1).with_user_id("u-event");
        let ctx = EventContext::builder()
            .correlation_id("corr-1")
            .session_id("sess-1")
            .metadata(json!({ "source": "admin" }))
            .build();

        let record = store.store_event(&event, "booking.created", &ctx).await.unwrap();

        assert_eq!(record.correlation_id(), Some("corr-1"));
        assert_eq!(record.session_id(), Some("sess-1"));
        assert_eq!(record.user_id(), Some("u-event"));
        assert_eq!(record.metadata(), Some(&json!({ "source": "admin" })));
        assert!(store.verify_integrity("e-1").await.unwrap());
    }

    #[tokio::test]
    async fn status_lifecycle_sets_timestamps_and_message() {
        let repo = Arc::new(InMemoryEventRecordRepository::new());
        let (store, _) = store_with(repo.clone());
        let ctx = EventContext::default();
        store.store_event(&booking("ok", 1), "booking.created", &ctx).await.unwrap();
        store.store_event(&booking("bad", 2), "booking.created", &ctx).await.unwrap();

        store.mark_event_as_processed("ok").await.unwrap();
        store
            .mark_event_as_failed("bad", "wallet offline", 2, None)
            .await
            .unwrap();
        // 不存在的事件只是零行更新
        store.mark_event_as_processed("ghost").await.unwrap();

        let records = repo.records().await;
        let ok = &records[0];
        let bad = &records[1];
        assert_eq!(ok.status(), EventStatus::Processed);
        assert!(ok.processed_at().is_some());
        assert_eq!(bad.status(), EventStatus::Failed);
        assert!(bad.failed_at().is_some());
        assert_eq!(bad.error_message(), Some("wallet offline"));
        assert_eq!(bad.retry_count(), 2);
    }

    #[tokio::test]
    async fn duplicate_event_id_is_rejected() {
        let (store, _) = store_with(Arc::new(InMemoryEventRecordRepository::new()));
        let ctx = EventContext::default();
        let event = booking("dup", 1);

        store.store_event(&event, "booking.created", &ctx).await.unwrap();
        let err = store.store_event(&event, "booking.created", &ctx).await.unwrap_err();

        assert!(matches!(err, EventError::DuplicateEvent { .. }));
    }

    #[tokio::test]
    async fn event_stream_is_ordered_by_aggregate_version() {
        let (store, _) = store_with(Arc::new(InMemoryEventRecordRepository::new()));
        let ctx = EventContext::default();
        for (id, version) in [("e-3", 3), ("e-1", 1), ("e-2", 2)] {
            store.store_event(&booking(id, version), "booking.created", &ctx).await.unwrap();
        }

        let stream = store
            .get_event_stream(Some("b-1"), Some("booking"), None, Some(2))
            .await
            .unwrap();
        let ids: Vec<_> = stream.iter().map(|r| r.event_id()).collect();
        assert_eq!(ids, vec!["e-1", "e-2"]);

        let none = store
            .get_event_stream(Some("b-2"), None, None, None)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn replay_isolates_failures_and_marks_replayed() {
        let repo = Arc::new(InMemoryEventRecordRepository::new());
        let (store, dispatcher) = store_with(repo.clone());
        let ctx = EventContext::default();
        for i in 1..=4 {
            store.store_event(&booking(&format!("e-{i}"), i), "booking.created", &ctx).await.unwrap();
        }
        dispatcher.subscribe(
            "booking.created",
            Arc::new(handler_fn("projector", HandledEventType::All, |event| async move {
                if event.event_id() == "e-2" {
                    anyhow::bail!("projection rejected e-2");
                }
                Ok(())
            })),
        );

        let outcome = store.replay_events(&ReplayCriteria::default()).await.unwrap();

        assert_eq!(outcome, ReplayOutcome { replayed: 3, failed: 1 });
        let statuses: Vec<_> = repo.records().await.iter().map(|r| r.status()).collect();
        assert_eq!(
            statuses,
            vec![
                EventStatus::Replayed,
                EventStatus::Pending,
                EventStatus::Replayed,
                EventStatus::Replayed
            ]
        );
    }

    #[tokio::test]
    async fn replay_without_limit_covers_every_matching_record() {
        let repo = Arc::new(InMemoryEventRecordRepository::new());
        let dispatcher = Arc::new(EventDispatcher::new());
        let store = EventStore::builder()
            .repository(repo.clone())
            .dispatcher(dispatcher)
            .default_replay_limit(3)
            .build();
        let ctx = EventContext::default();
        for i in 1..=5 {
            store.store_event(&booking(&format!("e-{i}"), i), "booking.created", &ctx).await.unwrap();
        }

        let listed = store.get_events_for_replay(&ReplayCriteria::default()).await.unwrap();
        assert_eq!(listed.len(), 3);

        let outcome = store.replay_events(&ReplayCriteria::default()).await.unwrap();
        assert_eq!(outcome, ReplayOutcome { replayed: 5, failed: 0 });

        let bounded = store
            .replay_events(&ReplayCriteria::builder().limit(2).build())
            .await
            .unwrap();
        assert_eq!(bounded.replayed, 2);
    }

    #[tokio::test]
    async fn cleanup_only_removes_old_processed_records() {
        let repo = Arc::new(InMemoryEventRecordRepository::new());
        let (store, _) = store_with(repo.clone());
        let ctx = EventContext::default();
        let old = Utc::now() - Duration::days(120);
        let fresh = Utc::now() - Duration::days(5);

        let cases = [
            ("old-processed", old, Some(EventStatus::Processed)),
            ("old-failed", old, Some(EventStatus::Failed)),
            ("old-pending", old, None),
            ("fresh-processed", fresh, Some(EventStatus::Processed)),
        ];
        for (id, at, status) in cases {
            let event = DomainEvent::builder()
                .event_id(id)
                .event_type("payment.completed")
                .occurred_at(at)
                .build();
            store.store_event(&event, "payment.completed", &ctx).await.unwrap();
            match status {
                Some(EventStatus::Processed) => store.mark_event_as_processed(id).await.unwrap(),
                Some(EventStatus::Failed) => {
                    store.mark_event_as_failed(id, "boom", 0, None).await.unwrap()
                }
                _ => {}
            }
        }

        let deleted = store.cleanup_old_events(DEFAULT_RETENTION_DAYS).await.unwrap();

        assert_eq!(deleted, 1);
        let remaining: Vec<String> = repo
            .records()
            .await
            .iter()
            .map(|r| r.event_id().to_string())
            .collect();
        assert_eq!(remaining, vec!["old-failed", "old-pending", "fresh-processed"]);
    }

    #[tokio::test]
    async fn statistics_count_by_status_and_type() {
        let (store, _) = store_with(Arc::new(InMemoryEventRecordRepository::new()));
        let ctx = EventContext::default();
        store.store_event(&booking("e-1", 1), "booking.created", &ctx).await.unwrap();
        store.store_event(&booking("e-2", 2), "booking.confirmed", &ctx).await.unwrap();
        store.mark_event_as_processed("e-1").await.unwrap();

        let stats = store.get_statistics().await.unwrap();

        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.events_by_status.get("PROCESSED"), Some(&1));
        assert_eq!(stats.events_by_status.get("PENDING"), Some(&1));
        assert_eq!(stats.events_by_type.get("booking.confirmed"), Some(&1));
        assert!(stats.oldest_event <= stats.newest_event);
    }

    struct BrokenRepository;

    #[async_trait]
    impl EventRecordRepository for BrokenRepository {
        async fn insert(&self, _record: EventRecord) -> EventResult<EventRecord> {
            Err(EventError::Database {
                reason: "connection reset".into(),
            })
        }
        async fn find_latest(&self) -> EventResult<Option<EventRecord>> {
            Ok(None)
        }
        async fn find_by_event_id(&self, _event_id: &str) -> EventResult<Option<EventRecord>> {
            Ok(None)
        }
        async fn find(
            &self,
            _filter: &RecordFilter,
            _order: RecordOrder,
            _page: Page,
        ) -> EventResult<Vec<EventRecord>> {
            Ok(vec![])
        }
        async fn update(&self, _event_id: &str, _change: RecordChange) -> EventResult<u64> {
            Ok(0)
        }
        async fn delete(&self, _filter: &RecordFilter) -> EventResult<u64> {
            Ok(0)
        }
        async fn statistics(&self) -> EventResult<EventStatistics> {
            Ok(EventStatistics::default())
        }
    }

    #[tokio::test]
    async fn store_failure_propagates_without_retry() {
        let (store, _) = store_with(Arc::new(BrokenRepository));

        let err = store
            .store_event(&booking("e-1", 1), "booking.created", &EventContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EventError::Database { .. }));
        let missing = store.verify_integrity("e-1").await.unwrap_err();
        assert!(matches!(missing, EventError::NotFound { .. }));
    }
}
