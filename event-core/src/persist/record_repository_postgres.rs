//! Postgres 事件记录仓储（PgEventRecordRepository）
//!
//! 表结构见 `migrations/0001_event_records.sql`：`event_id` 与 `sequence_number` 均有唯一约束，
//! 并发写入导致的序号冲突会以错误的形式暴露给调用方。

use super::event_record::{EventRecord, EventStatus};
use super::record_repository::{
    EventRecordRepository, EventStatistics, Page, RecordChange, RecordFilter, RecordOrder,
};
use crate::error::{EventError, EventResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

const COLUMNS: &str = "id, event_id, event_type, aggregate_id, aggregate_type, aggregate_version, \
     event_data, metadata, correlation_id, causation_id, user_id, session_id, status, \
     processed_at, failed_at, error_message, retry_count, next_retry_at, occurred_at, \
     content_hash, previous_event_id, sequence_number, created_at";

/// 建表语句，供测试或自举环境直接执行
pub const MIGRATION_SQL: &str = include_str!("../../migrations/0001_event_records.sql");

#[derive(Clone)]
pub struct PgEventRecordRepository {
    pool: PgPool,
}

impl PgEventRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_record(row: &PgRow) -> EventResult<EventRecord> {
        let status: String = row.try_get("status")?;
        Ok(EventRecord {
            id: row.try_get("id")?,
            event_id: row.try_get("event_id")?,
            event_type: row.try_get("event_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_version: row.try_get("aggregate_version")?,
            event_data: row.try_get("event_data")?,
            metadata: row.try_get("metadata")?,
            correlation_id: row.try_get("correlation_id")?,
            causation_id: row.try_get("causation_id")?,
            user_id: row.try_get("user_id")?,
            session_id: row.try_get("session_id")?,
            status: status.parse::<EventStatus>()?,
            processed_at: row.try_get("processed_at")?,
            failed_at: row.try_get("failed_at")?,
            error_message: row.try_get("error_message")?,
            retry_count: row.try_get("retry_count")?,
            next_retry_at: row.try_get("next_retry_at")?,
            occurred_at: row.try_get("occurred_at")?,
            content_hash: row.try_get("content_hash")?,
            previous_event_id: row.try_get("previous_event_id")?,
            sequence_number: row.try_get("sequence_number")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &RecordFilter) {
        builder.push(" WHERE TRUE");
        if let Some(from) = filter.from {
            builder.push(" AND occurred_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            builder.push(" AND occurred_at <= ").push_bind(to);
        }
        if let Some(before) = filter.occurred_before {
            builder.push(" AND occurred_at < ").push_bind(before);
        }
        if !filter.event_types.is_empty() {
            builder
                .push(" AND event_type = ANY(")
                .push_bind(filter.event_types.clone())
                .push(")");
        }
        if !filter.aggregate_ids.is_empty() {
            builder
                .push(" AND aggregate_id = ANY(")
                .push_bind(filter.aggregate_ids.clone())
                .push(")");
        }
        if !filter.aggregate_types.is_empty() {
            builder
                .push(" AND aggregate_type = ANY(")
                .push_bind(filter.aggregate_types.clone())
                .push(")");
        }
        if !filter.statuses.is_empty() {
            let statuses: Vec<String> = filter
                .statuses
                .iter()
                .map(|s| s.as_str().to_string())
                .collect();
            builder
                .push(" AND status = ANY(")
                .push_bind(statuses)
                .push(")");
        }
        if let Some(v) = filter.from_version {
            builder.push(" AND aggregate_version >= ").push_bind(v);
        }
        if let Some(v) = filter.to_version {
            builder.push(" AND aggregate_version <= ").push_bind(v);
        }
    }
}

fn map_insert_error(err: sqlx::Error, event_id: &str) -> EventError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            if db.constraint() == Some("uq_event_records_sequence_number") {
                EventError::EventRepository {
                    reason: format!("sequence number conflict while storing {event_id}"),
                }
            } else {
                EventError::DuplicateEvent {
                    event_id: event_id.to_string(),
                }
            }
        }
        _ => EventError::from(err),
    }
}

#[async_trait]
impl EventRecordRepository for PgEventRecordRepository {
    async fn insert(&self, record: EventRecord) -> EventResult<EventRecord> {
        let row = sqlx::query(&format!(
            "INSERT INTO event_records (
                event_id, event_type, aggregate_id, aggregate_type, aggregate_version,
                event_data, metadata, correlation_id, causation_id, user_id, session_id,
                status, processed_at, failed_at, error_message, retry_count, next_retry_at,
                occurred_at, content_hash, previous_event_id, sequence_number, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22)
            RETURNING {COLUMNS}"
        ))
        .bind(&record.event_id)
        .bind(&record.event_type)
        .bind(&record.aggregate_id)
        .bind(&record.aggregate_type)
        .bind(record.aggregate_version)
        .bind(&record.event_data)
        .bind(&record.metadata)
        .bind(&record.correlation_id)
        .bind(&record.causation_id)
        .bind(&record.user_id)
        .bind(&record.session_id)
        .bind(record.status.as_str())
        .bind(record.processed_at)
        .bind(record.failed_at)
        .bind(&record.error_message)
        .bind(record.retry_count)
        .bind(record.next_retry_at)
        .bind(record.occurred_at)
        .bind(&record.content_hash)
        .bind(record.previous_event_id)
        .bind(record.sequence_number)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &record.event_id))?;

        Self::row_to_record(&row)
    }

    async fn find_latest(&self) -> EventResult<Option<EventRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM event_records ORDER BY sequence_number DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find_by_event_id(&self, event_id: &str) -> EventResult<Option<EventRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM event_records WHERE event_id = $1"
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find(
        &self,
        filter: &RecordFilter,
        order: RecordOrder,
        page: Page,
    ) -> EventResult<Vec<EventRecord>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM event_records"));
        Self::push_filter(&mut builder, filter);
        builder.push(match order {
            RecordOrder::SequenceAsc => " ORDER BY sequence_number ASC",
            RecordOrder::OccurredAtAsc => " ORDER BY occurred_at ASC, sequence_number ASC",
            RecordOrder::AggregateVersionAsc => {
                " ORDER BY aggregate_version ASC, sequence_number ASC"
            }
        });
        if let Some(limit) = page.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }
        builder.push(" OFFSET ").push_bind(page.offset as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn update(&self, event_id: &str, change: RecordChange) -> EventResult<u64> {
        let result = match change {
            RecordChange::Processed { at } => {
                sqlx::query(
                    "UPDATE event_records SET status = $1, processed_at = $2 WHERE event_id = $3",
                )
                .bind(EventStatus::Processed.as_str())
                .bind(at)
                .bind(event_id)
                .execute(&self.pool)
                .await?
            }
            RecordChange::Failed {
                at,
                error_message,
                retry_count,
                next_retry_at,
            } => {
                sqlx::query(
                    "UPDATE event_records
                     SET status = $1, failed_at = $2, error_message = $3, retry_count = $4,
                         next_retry_at = $5
                     WHERE event_id = $6",
                )
                .bind(EventStatus::Failed.as_str())
                .bind(at)
                .bind(error_message)
                .bind(retry_count)
                .bind(next_retry_at)
                .bind(event_id)
                .execute(&self.pool)
                .await?
            }
            RecordChange::Replayed => {
                sqlx::query("UPDATE event_records SET status = $1 WHERE event_id = $2")
                    .bind(EventStatus::Replayed.as_str())
                    .bind(event_id)
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected())
    }

    async fn delete(&self, filter: &RecordFilter) -> EventResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM event_records");
        Self::push_filter(&mut builder, filter);
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn statistics(&self) -> EventResult<EventStatistics> {
        let (total, oldest, newest): (i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>) =
            sqlx::query_as(
                "SELECT COUNT(*), MIN(occurred_at), MAX(occurred_at) FROM event_records",
            )
            .fetch_one(&self.pool)
            .await?;

        let by_status: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM event_records GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let by_type: Vec<(String, i64)> = sqlx::query_as(
            "SELECT event_type, COUNT(*) FROM event_records GROUP BY event_type",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(EventStatistics {
            total_events: total as u64,
            events_by_status: by_status
                .into_iter()
                .map(|(k, v)| (k, v as u64))
                .collect(),
            events_by_type: by_type.into_iter().map(|(k, v)| (k, v as u64)).collect(),
            oldest_event: oldest,
            newest_event: newest,
        })
    }
}
