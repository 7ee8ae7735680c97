use async_trait::async_trait;
use event_admin::admin::{
    CleanupEvents, GetEventStatistics, GetRetryStatistics, ListFailedEvents, ReplayEvents,
    VerifyEventIntegrity,
};
use event_admin::CommandBus;
use event_admin::context::AppContext;
use event_admin::QueryBus;
use event_admin::{EventAdmin, InMemoryCommandBus, InMemoryQueryBus};
use event_core::domain_event::{DEAD_LETTER_CHANNEL, DeadLetterNotice, DomainEvent, EventContext};
use event_core::error::HandlerError;
use event_core::event_store::ReplayCriteria;
use event_core::eventing::{
    ErrorHandlingOptions, EventBus, EventEngine, EventEngineConfig, EventHandler,
    HandledEventType, RetryConfig, handler_fn,
};
use event_core::persist::InMemoryEventRecordRepository;
use event_macros::domain_event;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[domain_event(aggregate_type = "Booking", aggregate_id = booking_id)]
enum BookingEvent {
    #[event(event_type = "booking.created")]
    Created {
        booking_id: String,
        member: String,
        space: String,
        hours: u32,
    },
    #[event(event_type = "booking.confirmed")]
    Confirmed { booking_id: String },
    #[event(event_type = "booking.cancelled")]
    Cancelled {
        booking_id: String,
        reason: Option<String>,
    },
}

#[domain_event(aggregate_type = "Payment")]
enum PaymentEvent {
    #[event(event_type = "payment.completed", aggregate_id = payment_id)]
    Completed {
        payment_id: String,
        booking_id: String,
        amount_cents: i64,
    },
}

/// 开票处理器：首次调用模拟账务服务超时
struct InvoiceHandler {
    attempts: AtomicUsize,
}

#[async_trait]
impl EventHandler for InvoiceHandler {
    fn handler_name(&self) -> &str {
        "invoice"
    }

    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::One("payment.completed".into())
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let PaymentEvent::Completed {
            payment_id,
            amount_cents,
            ..
        } = event.payload::<PaymentEvent>()?;
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(HandlerError::new("TimeoutError", "ledger did not answer in time").into());
        }
        println!("invoice issued: payment={payment_id}, amount={amount_cents}");
        Ok(())
    }
}

fn retry_config_from_env() -> anyhow::Result<RetryConfig> {
    match std::env::var("EVENT_CORE_RETRY_CONFIG") {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(_) => Ok(RetryConfig::default()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let engine = EventEngine::builder()
        .repository(Arc::new(InMemoryEventRecordRepository::new()))
        .retry_config(retry_config_from_env()?)
        .config(EventEngineConfig {
            sweep_interval: Duration::from_millis(200),
            ..Default::default()
        })
        .build();

    // 死信监控
    engine.dispatcher().subscribe(
        DEAD_LETTER_CHANNEL,
        Arc::new(handler_fn("dead-letter-monitor", HandledEventType::All, |event| async move {
            let notice = DeadLetterNotice::from_event(&event)?;
            println!(
                "dead letter: handler={}, event={}, retries={}, error={}",
                notice.handler, notice.event_id, notice.retry_count, notice.error
            );
            Ok(())
        })),
    );

    // 审计：接收全部领域事件
    let audited = Arc::new(AtomicUsize::new(0));
    let counter = audited.clone();
    engine.bus().subscribe_to_all(Arc::new(handler_fn(
        "audit-log",
        HandledEventType::All,
        move |event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tracing::info!(event_id = event.event_id(), event_type = event.event_type(), "audited");
                Ok(())
            }
        },
    )));

    engine.dispatcher().register(Arc::new(engine.error_handled(
        InvoiceHandler {
            attempts: AtomicUsize::new(0),
        },
        ErrorHandlingOptions::non_critical(),
    )));

    // 门禁卡开通：关键处理器，首次失败会让发布方收到错误
    let badge_attempts = Arc::new(AtomicUsize::new(0));
    let badge_counter = badge_attempts.clone();
    let access_badge = handler_fn(
        "access-badge",
        HandledEventType::One("booking.confirmed".into()),
        move |event| {
            let counter = badge_counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(anyhow::Error::new(HandlerError::new(
                        "ServiceUnavailableError",
                        "badge printer offline",
                    )));
                }
                println!("badge activated for {}", event.aggregate_id().unwrap_or("-"));
                Ok(())
            }
        },
    );
    engine
        .dispatcher()
        .register(Arc::new(engine.error_handled(access_badge, ErrorHandlingOptions::critical())));

    // CRM 同步：校验错误不可重试，直接进入死信
    let crm_sync = handler_fn(
        "crm-sync",
        HandledEventType::One("booking.cancelled".into()),
        |_event| async move {
            Err(anyhow::Error::new(HandlerError::new(
                "ValidationError",
                "member record is incomplete",
            )))
        },
    );
    engine
        .dispatcher()
        .register(Arc::new(engine.error_handled(crm_sync, ErrorHandlingOptions::non_critical())));

    let handle = engine.start();
    let ctx = EventContext::builder()
        .correlation_id("req-2026-001")
        .user_id("member-42")
        .build();

    let created = DomainEvent::from_payload(&BookingEvent::Created {
        booking_id: "bk-1".into(),
        member: "member-42".into(),
        space: "meeting-room-a".into(),
        hours: 2,
    })?;
    let paid = DomainEvent::from_payload(&PaymentEvent::Completed {
        payment_id: "pay-1".into(),
        booking_id: "bk-1".into(),
        amount_cents: 4_000,
    })?;
    engine.bus().publish_all(&[created.clone(), paid], &ctx).await?;

    let confirmed =
        DomainEvent::from_payload(&BookingEvent::Confirmed { booking_id: "bk-1".into() })?
            .with_aggregate_version(2);
    if let Err(err) = engine.bus().publish(&confirmed, &ctx).await {
        println!("confirmation delivery failed, retry scheduled: {err}");
    }

    let cancelled = DomainEvent::from_payload(&BookingEvent::Cancelled {
        booking_id: "bk-2".into(),
        reason: Some("member no-show".into()),
    })?;
    engine.bus().publish(&cancelled, &ctx).await?;

    // 等待后台清扫完成重试
    tokio::time::sleep(Duration::from_secs(3)).await;
    handle.shutdown();
    handle.join().await;

    let commands = InMemoryCommandBus::new();
    let queries = InMemoryQueryBus::new();
    Arc::new(EventAdmin::from_engine(&engine)).register(&commands, &queries)?;
    let admin = AppContext {
        event: ctx.clone(),
        operator: Some("ops@coworking.example".into()),
    };

    let stats = queries.dispatch(&admin, GetEventStatistics).await?;
    println!(
        "stored: total={}, by_status={:?}, by_type={:?}",
        stats.total_events, stats.events_by_status, stats.events_by_type
    );

    let retry_stats = queries.dispatch(&admin, GetRetryStatistics).await?;
    let failed = queries.dispatch(&admin, ListFailedEvents).await?;
    println!(
        "pending retries: {}, average retry count: {:.1}",
        failed.count, retry_stats.average_retry_count
    );

    let integrity = queries
        .dispatch(
            &admin,
            VerifyEventIntegrity {
                event_id: created.event_id().to_string(),
            },
        )
        .await?;
    println!("integrity of {}: {}", integrity.event_id, integrity.valid);

    let replay = commands
        .dispatch(
            &admin,
            ReplayEvents {
                criteria: ReplayCriteria::builder()
                    .event_types(vec!["booking.created".to_string()])
                    .build(),
            },
        )
        .await?;
    println!("{}", replay.message);

    let cleanup = commands
        .dispatch(&admin, CleanupEvents { retention_days: None })
        .await?;
    println!("{}", cleanup.message);

    println!("audited deliveries: {}", audited.load(Ordering::SeqCst));
    Ok(())
}
