use event_core::domain_event::{DomainEvent, EventPayload};
use event_macros::domain_event;

#[domain_event(aggregate_type = "Booking", aggregate_id = booking_id)]
enum BookingEvent {
    #[event(event_type = "booking.created")]
    Created {
        booking_id: String,
        desk: String,
        amount: f64,
    },
    #[event(event_type = "booking.cancelled")]
    Cancelled {
        booking_id: String,
        reason: Option<String>,
    },
}

fn main() {
    let created = BookingEvent::Created {
        booking_id: "b-1".into(),
        desk: "A-12".into(),
        amount: 45.5,
    };

    assert_eq!(created.event_type(), "booking.created");
    assert_eq!(BookingEvent::aggregate_type(), Some("Booking"));
    assert_eq!(created.aggregate_id().as_deref(), Some("b-1"));
    assert_eq!(
        BookingEvent::event_types(),
        &["booking.created", "booking.cancelled"]
    );

    let event = DomainEvent::from_payload(&created).unwrap();
    assert_eq!(event.event_type(), "booking.created");
    assert_eq!(event.aggregate_type(), Some("Booking"));
    assert_eq!(event.payload::<BookingEvent>().unwrap(), created);

    let cancelled = BookingEvent::Cancelled {
        booking_id: "b-1".into(),
        reason: None,
    };
    let event = DomainEvent::from_payload(&cancelled).unwrap();
    assert_eq!(event.payload::<BookingEvent>().unwrap(), cancelled);
}
