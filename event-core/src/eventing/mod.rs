//! 事件子系统（eventing）
//!
//! 提供事件发布/订阅与失败处理的运行时：
//! - `EventDispatcher`：进程内通道到处理器列表的分发；
//! - `EventBus` / `DurableEventBus`：先存储、再分发的发布接口；
//! - `RetryCoordinator`：失败跟踪、指数退避重试与死信；
//! - `ErrorHandled`：处理器的统一错误处理包装；
//! - `EventEngine`：组装以上组件并驱动周期性的重试清扫。
//!
pub mod bus;
mod bus_durable;
mod dispatcher;
pub mod engine;
mod error_handling;
pub mod handler;
pub mod retry;

pub use bus::EventBus;
pub use bus_durable::DurableEventBus;
pub use dispatcher::EventDispatcher;
pub use engine::{EngineHandle, EventEngine, EventEngineConfig};
pub use error_handling::{CustomErrorHandler, ErrorHandled, ErrorHandlingOptions, ErrorLogLevel};
pub use handler::{EventHandler, FnHandler, HandledEventType, handler_fn};
pub use retry::{
    FailedEventEntry, FailureDisposition, RetryConfig, RetryConfigPatch, RetryCoordinator,
    RetryStatistics, RoutedFailure, retry_key,
};
