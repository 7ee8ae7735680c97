//! 持久化（persist）
//!
//! 定义事件记录与其仓储协议：
//! - 事件记录、处理状态与内容摘要（`EventRecord`/`EventStatus`/`content_hash`）；
//! - 按条件查询、状态迁移、清理与统计（`EventRecordRepository`）；
//! - 内存实现，以及 `infra-sqlx` 特性下的 Postgres 实现。
//!
//! 该模块聚焦协议与数据形态，序号分配与状态机编排由 `event_store` 负责。
//!
mod event_record;
mod record_repository;
mod record_repository_inmemory;
#[cfg(feature = "infra-sqlx")]
mod record_repository_postgres;

pub use event_record::{EventRecord, EventStatus, content_hash};
pub use record_repository::{
    EventRecordRepository, EventStatistics, Page, RecordChange, RecordFilter, RecordOrder,
};
pub use record_repository_inmemory::InMemoryEventRecordRepository;
#[cfg(feature = "infra-sqlx")]
pub use record_repository_postgres::{MIGRATION_SQL, PgEventRecordRepository};
