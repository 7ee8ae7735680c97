//! 内存版事件记录仓储（InMemoryEventRecordRepository）
//!
//! 基于 `tokio::sync::RwLock` 的轻量实现，满足 `EventRecordRepository` 协议：
//! - 写入时分配递增的存储标识，并按 `event_id` 做唯一约束；
//! - 查询/更新/删除与 Postgres 实现保持相同语义；
//! - 典型用途：测试环境、示例与本地开发。

use super::event_record::EventRecord;
use super::record_repository::{
    EventRecordRepository, EventStatistics, Page, RecordChange, RecordFilter, RecordOrder,
};
use crate::error::{EventError, EventResult};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    records: Vec<EventRecord>,
    next_id: i64,
}

#[derive(Default)]
pub struct InMemoryEventRecordRepository {
    state: RwLock<State>,
}

impl InMemoryEventRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前全部记录（按写入顺序）
    pub async fn records(&self) -> Vec<EventRecord> {
        self.state.read().await.records.clone()
    }
}

#[async_trait]
impl EventRecordRepository for InMemoryEventRecordRepository {
    async fn insert(&self, mut record: EventRecord) -> EventResult<EventRecord> {
        let mut state = self.state.write().await;
        if state
            .records
            .iter()
            .any(|r| r.event_id == record.event_id)
        {
            return Err(EventError::DuplicateEvent {
                event_id: record.event_id,
            });
        }

        state.next_id += 1;
        record.id = state.next_id;
        state.records.push(record.clone());
        Ok(record)
    }

    async fn find_latest(&self) -> EventResult<Option<EventRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .max_by_key(|r| r.sequence_number)
            .cloned())
    }

    async fn find_by_event_id(&self, event_id: &str) -> EventResult<Option<EventRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .find(|r| r.event_id == event_id)
            .cloned())
    }

    async fn find(
        &self,
        filter: &RecordFilter,
        order: RecordOrder,
        page: Page,
    ) -> EventResult<Vec<EventRecord>> {
        let state = self.state.read().await;
        let mut matched: Vec<EventRecord> = state
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        match order {
            RecordOrder::SequenceAsc => matched.sort_by_key(|r| r.sequence_number),
            RecordOrder::OccurredAtAsc => {
                matched.sort_by_key(|r| (r.occurred_at, r.sequence_number))
            }
            RecordOrder::AggregateVersionAsc => {
                matched.sort_by_key(|r| (r.aggregate_version, r.sequence_number))
            }
        }

        let iter = matched.into_iter().skip(page.offset);
        Ok(match page.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        })
    }

    async fn update(&self, event_id: &str, change: RecordChange) -> EventResult<u64> {
        let mut state = self.state.write().await;
        let mut affected = 0;
        for record in state.records.iter_mut().filter(|r| r.event_id == event_id) {
            change.apply(record);
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete(&self, filter: &RecordFilter) -> EventResult<u64> {
        let mut state = self.state.write().await;
        let before = state.records.len();
        state.records.retain(|r| !filter.matches(r));
        Ok((before - state.records.len()) as u64)
    }

    async fn statistics(&self) -> EventResult<EventStatistics> {
        let state = self.state.read().await;
        let mut stats = EventStatistics {
            total_events: state.records.len() as u64,
            ..Default::default()
        };

        for record in &state.records {
            *stats
                .events_by_status
                .entry(record.status.as_str().to_string())
                .or_default() += 1;
            *stats
                .events_by_type
                .entry(record.event_type.clone())
                .or_default() += 1;
            stats.oldest_event = Some(match stats.oldest_event {
                Some(t) => t.min(record.occurred_at),
                None => record.occurred_at,
            });
            stats.newest_event = Some(match stats.newest_event {
                Some(t) => t.max(record.occurred_at),
                None => record.occurred_at,
            });
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{EventStatus, content_hash};
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    fn record(event_id: &str, seq: i64, occurred_at: DateTime<Utc>) -> EventRecord {
        let data = json!({ "event_type": "desk.reserved" });
        EventRecord::builder()
            .event_id(event_id.to_string())
            .event_type("desk.reserved".to_string())
            .aggregate_id("desk-1".to_string())
            .aggregate_type("desk".to_string())
            .aggregate_version(seq)
            .content_hash(content_hash(
                event_id,
                "desk.reserved",
                Some("desk-1"),
                Some("desk"),
                &data,
                occurred_at,
            ))
            .event_data(data)
            .occurred_at(occurred_at)
            .sequence_number(seq)
            .build()
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_rejects_duplicate_event_ids() {
        let repo = InMemoryEventRecordRepository::new();
        let now = Utc::now();

        let first = repo.insert(record("e-1", 1, now)).await.unwrap();
        let second = repo.insert(record("e-2", 2, now)).await.unwrap();
        assert_eq!((first.id(), second.id()), (1, 2));

        let err = repo.insert(record("e-1", 3, now)).await.unwrap_err();
        assert!(matches!(err, EventError::DuplicateEvent { event_id } if event_id == "e-1"));
        assert_eq!(repo.records().await.len(), 2);
    }

    #[tokio::test]
    async fn find_orders_and_paginates() {
        let repo = InMemoryEventRecordRepository::new();
        let now = Utc::now();
        // 发生时间与序号顺序相反
        for seq in 1..=5 {
            repo.insert(record(&format!("e-{seq}"), seq, now - Duration::minutes(seq)))
                .await
                .unwrap();
        }

        let by_seq = repo
            .find(&RecordFilter::default(), RecordOrder::SequenceAsc, Page::new(2, 1))
            .await
            .unwrap();
        let ids: Vec<_> = by_seq.iter().map(|r| r.event_id()).collect();
        assert_eq!(ids, vec!["e-2", "e-3"]);

        let by_time = repo
            .find(&RecordFilter::default(), RecordOrder::OccurredAtAsc, Page::all())
            .await
            .unwrap();
        assert_eq!(by_time.first().map(|r| r.event_id()), Some("e-5"));
    }

    #[tokio::test]
    async fn update_missing_event_is_zero_rows() {
        let repo = InMemoryEventRecordRepository::new();
        repo.insert(record("e-1", 1, Utc::now())).await.unwrap();

        let missing = repo.update("nope", RecordChange::Replayed).await.unwrap();
        let hit = repo.update("e-1", RecordChange::Replayed).await.unwrap();
        assert_eq!((missing, hit), (0, 1));
        assert_eq!(repo.records().await[0].status(), EventStatus::Replayed);
    }
}
