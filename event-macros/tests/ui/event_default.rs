use event_core::domain_event::{DomainEvent, EventPayload};
use event_macros::domain_event;

// 已有的派生与宏追加的派生合并去重
#[domain_event]
#[derive(Debug, Clone)]
enum DeskEvent {
    Opened { desk: String },
    Closed {},
}

fn main() {
    let opened = DeskEvent::Opened { desk: "A-1".into() };

    assert_eq!(opened.event_type(), "DeskEvent.Opened");
    assert_eq!(DeskEvent::Closed {}.event_type(), "DeskEvent.Closed");
    assert_eq!(DeskEvent::aggregate_type(), None);
    assert_eq!(opened.aggregate_id(), None);

    let other = DomainEvent::builder().event_type("desk.unknown").build();
    assert!(other.payload::<DeskEvent>().is_err());
}
