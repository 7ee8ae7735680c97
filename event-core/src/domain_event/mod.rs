//! 领域事件（Domain Event）
//!
//! 定义所有事件共享的信封 `DomainEvent`、类型化负载需要实现的接口 `EventPayload`、
//! 存储时的链路上下文 `EventContext`，以及死信/处理器错误两类通知。

mod event_context;
mod event_envelope;
mod event_payload;
mod notices;

pub use event_context::EventContext;
pub use event_envelope::DomainEvent;
pub use event_payload::{EventPayload, PayloadMap, decode_field, encode_field};
pub use notices::{
    DEAD_LETTER_CHANNEL, DOMAIN_EVENT_CHANNEL, DeadLetterNotice, HANDLER_ERROR_CHANNEL,
    HandlerErrorNotice,
};
