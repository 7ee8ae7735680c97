//! 事件宏（event-macros）
//!
//! 提供 `#[domain_event]` 属性宏，为载荷枚举生成 `::event_core::domain_event::EventPayload` 实现。
//!
use proc_macro::TokenStream;

mod domain_event;
mod utils;

/// 领域事件载荷宏
///
/// ```ignore
/// #[domain_event(aggregate_type = "Booking", aggregate_id = booking_id)]
/// enum BookingEvent {
///     #[event(event_type = "booking.created")]
///     Created { booking_id: String, amount: f64 },
///     Cancelled { booking_id: String, reason: Option<String> },
/// }
/// ```
///
/// - 仅支持具名字段变体；
/// - 事件类型默认是 `Enum.Variant`，可由变体上的 `#[event(event_type = "...")]` 覆写；
/// - `aggregate_id` 可在枚举级给出默认字段，变体级覆写；
/// - 自动追加 `Debug, Clone, PartialEq, Serialize, Deserialize` 派生。
#[proc_macro_attribute]
pub fn domain_event(attr: TokenStream, item: TokenStream) -> TokenStream {
    domain_event::expand(attr, item)
}
