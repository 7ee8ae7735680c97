//! 事件存储管理层（event-admin）
//!
//! 以 CQRS 风格的命令/查询总线承载事件存储的运维用例，
//! 具体用例见 [`admin`]。
//!
pub mod admin;
pub mod command;
pub mod context;
pub mod dto;
pub mod error;
pub mod inmemory_command_bus;
pub mod inmemory_query_bus;
pub mod query;

pub use admin::EventAdmin;
pub use command::{Command, CommandBus, CommandHandler};
pub use query::{Query, QueryBus, QueryHandler};
pub use inmemory_command_bus::InMemoryCommandBus;
pub use inmemory_query_bus::InMemoryQueryBus;
