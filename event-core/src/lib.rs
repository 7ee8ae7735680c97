//! 事件存储与分发基础库（event-core）
//!
//! 为应用提供一条“先持久化、再通知”的领域事件管道：
//! - 领域事件信封与类型化载荷（`domain_event`）；
//! - 带内容摘要与全局序号的事件记录及其仓储（`persist`）；
//! - 存储服务：状态流转、查询、重放、清理与完整性校验（`event_store`）；
//! - 事件系统（`eventing`）：分发器、总线、重试协调器、错误处理包装与引擎。
//!
//! 存储实现通过 `EventRecordRepository` 解耦，内置内存实现，
//! 启用 `infra-sqlx` 特性后提供 Postgres 实现。
//!
//! 典型用法：
//! 1. 用 `#[domain_event]` 声明载荷枚举，经 `DomainEvent::from_payload` 生成事件；
//! 2. 以仓储构建 `EventEngine`，注册（可包装的）处理器并 `start()` 重试清扫；
//! 3. 通过 `engine.bus().publish(..)` 发布事件。
//!
pub mod domain_event;
pub mod error;
pub mod event_store;
pub mod eventing;
pub mod persist;

// 允许在本 crate 内部通过 ::event_core 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::event_core 路径。
extern crate self as event_core;
