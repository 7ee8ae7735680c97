use event_core::domain_event::EventPayload;
use event_macros::domain_event;

#[domain_event(aggregate_type = "Payment", aggregate_id = payment_id)]
enum PaymentEvent {
    #[event(event_type = "payment.completed")]
    Completed { payment_id: u64, amount: f64 },
    // 变体级覆写聚合 ID 字段
    #[event(event_type = "payment.refunded", aggregate_id = original_payment)]
    Refunded { refund_id: u64, original_payment: u64 },
    #[event(event_type = "payment.batch_settled")]
    BatchSettled { batch: Vec<u64> },
}

fn main() {
    let completed = PaymentEvent::Completed { payment_id: 7, amount: 10.0 };
    let refunded = PaymentEvent::Refunded { refund_id: 9, original_payment: 7 };
    let settled = PaymentEvent::BatchSettled { batch: vec![7, 8] };

    assert_eq!(completed.aggregate_id().as_deref(), Some("7"));
    assert_eq!(refunded.aggregate_id().as_deref(), Some("7"));
    assert_eq!(settled.aggregate_id(), None);

    let metadata = refunded.to_metadata().unwrap();
    assert_eq!(metadata.get("refund_id"), Some(&serde_json::json!(9)));
}
