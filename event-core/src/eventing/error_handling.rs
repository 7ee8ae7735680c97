//! 处理器错误包装（ErrorHandled）
//!
//! 为任意 [`EventHandler`] 叠加统一的失败处理：按级别记录日志、调用自定义回调、
//! 交给重试协调器、发出 `event.handler.error` 通知，最后决定吞掉还是向上返回错误。
//!
use super::retry::{RetryConfigPatch, RetryCoordinator, RoutedFailure};
use super::{EventDispatcher, EventHandler, HandledEventType};
use crate::domain_event::{DomainEvent, HANDLER_ERROR_CHANNEL, HandlerErrorNotice};
use async_trait::async_trait;
use bon::Builder;
use chrono::Utc;
use std::fmt;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorLogLevel {
    #[default]
    Error,
    Warn,
    Debug,
}

/// 自定义错误回调；回调自身失败只记录日志
pub type CustomErrorHandler =
    Arc<dyn Fn(&anyhow::Error, &DomainEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Default, Builder)]
pub struct ErrorHandlingOptions {
    #[builder(default)]
    pub log_level: ErrorLogLevel,
    pub custom_handler: Option<CustomErrorHandler>,
    #[builder(default)]
    pub suppress_errors: bool,
    pub retry: Option<RetryConfigPatch>,
}

impl fmt::Debug for ErrorHandlingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandlingOptions")
            .field("log_level", &self.log_level)
            .field("custom_handler", &self.custom_handler.is_some())
            .field("suppress_errors", &self.suppress_errors)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ErrorHandlingOptions {
    /// 关键处理器：5 次重试，错误向上返回
    pub fn critical() -> Self {
        Self {
            log_level: ErrorLogLevel::Error,
            custom_handler: None,
            suppress_errors: false,
            retry: Some(RetryConfigPatch {
                max_retries: Some(5),
                base_delay_ms: Some(2000),
                max_delay_ms: Some(60_000),
                ..Default::default()
            }),
        }
    }

    /// 非关键处理器：2 次重试，吞掉错误
    pub fn non_critical() -> Self {
        Self {
            log_level: ErrorLogLevel::Warn,
            custom_handler: None,
            suppress_errors: true,
            retry: Some(RetryConfigPatch {
                max_retries: Some(2),
                base_delay_ms: Some(1000),
                max_delay_ms: Some(10_000),
                ..Default::default()
            }),
        }
    }

    /// 统计类处理器：1 次重试，调试级日志，吞掉错误
    pub fn analytics() -> Self {
        Self {
            log_level: ErrorLogLevel::Debug,
            custom_handler: None,
            suppress_errors: true,
            retry: Some(RetryConfigPatch {
                max_retries: Some(1),
                base_delay_ms: Some(5000),
                max_delay_ms: Some(30_000),
                ..Default::default()
            }),
        }
    }

    pub fn with_custom_handler(mut self, handler: CustomErrorHandler) -> Self {
        self.custom_handler = Some(handler);
        self
    }
}

pub struct ErrorHandled<H> {
    inner: H,
    options: ErrorHandlingOptions,
    retry: Option<Arc<RetryCoordinator>>,
    emitter: Option<Weak<EventDispatcher>>,
}

impl<H: EventHandler> ErrorHandled<H> {
    pub fn new(inner: H, options: ErrorHandlingOptions) -> Self {
        Self {
            inner,
            options,
            retry: None,
            emitter: None,
        }
    }

    pub fn with_retry(mut self, retry: Arc<RetryCoordinator>) -> Self {
        self.retry = Some(retry);
        self
    }

    /// 处理器错误通知经由该分发器发出
    pub fn with_emitter(mut self, dispatcher: &Arc<EventDispatcher>) -> Self {
        self.emitter = Some(Arc::downgrade(dispatcher));
        self
    }

    pub fn options(&self) -> &ErrorHandlingOptions {
        &self.options
    }

    fn log_failure(&self, event: &DomainEvent, error: &anyhow::Error) {
        let handler = self.inner.handler_name();
        let event_id = event.event_id();
        let event_type = event.event_type();
        match self.options.log_level {
            ErrorLogLevel::Error => {
                tracing::error!(handler, event_id, event_type, error = %format!("{error:#}"), "event handler failed")
            }
            ErrorLogLevel::Warn => {
                tracing::warn!(handler, event_id, event_type, error = %format!("{error:#}"), "event handler failed")
            }
            ErrorLogLevel::Debug => {
                tracing::debug!(handler, event_id, event_type, error = %format!("{error:#}"), "event handler failed")
            }
        }
    }

    async fn emit_notice(&self, event: &DomainEvent, error: &anyhow::Error) {
        // 通知本身的处理失败不再产生新的通知
        if event.event_type() == HANDLER_ERROR_CHANNEL {
            return;
        }
        let Some(dispatcher) = self.emitter.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let notice = HandlerErrorNotice {
            handler: self.inner.handler_name().to_string(),
            event_type: event.event_type().to_string(),
            event_id: event.event_id().to_string(),
            error: format!("{error:#}"),
            error_detail: format!("{error:?}"),
            timestamp: Utc::now(),
        };
        let emitted = match notice.to_event() {
            Ok(notice_event) => dispatcher.emit(HANDLER_ERROR_CHANNEL, &notice_event).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = emitted {
            tracing::warn!(
                handler = self.inner.handler_name(),
                event_id = event.event_id(),
                error = %err,
                "failed to emit handler error notice"
            );
        }
    }
}

#[async_trait]
impl<H: EventHandler> EventHandler for ErrorHandled<H> {
    fn handler_name(&self) -> &str {
        self.inner.handler_name()
    }

    fn handled_event_type(&self) -> HandledEventType {
        self.inner.handled_event_type()
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let error = match self.inner.handle(event).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        self.log_failure(event, &error);

        if let Some(custom) = &self.options.custom_handler {
            if let Err(custom_err) = custom(&error, event) {
                tracing::error!(
                    handler = self.inner.handler_name(),
                    event_id = event.event_id(),
                    error = %custom_err,
                    "custom error handler failed"
                );
            }
        }

        let routed = match &self.retry {
            Some(retry) => {
                retry
                    .handle_failed_event(
                        event,
                        event.event_type(),
                        self.inner.handler_name(),
                        &error,
                        self.options.retry.as_ref(),
                    )
                    .await;
                true
            }
            None => false,
        };

        self.emit_notice(event, &error).await;

        if self.options.suppress_errors {
            return Ok(());
        }
        if routed {
            return Err(error.context(RoutedFailure {
                handler: self.inner.handler_name().to_string(),
            }));
        }
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::eventing::{RetryConfig, handler_fn};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failing(kind: &'static str) -> impl EventHandler {
        handler_fn("mailer", HandledEventType::One("booking.created".into()), move |_event| async move {
            Err(anyhow::Error::new(HandlerError::new(kind, "smtp down")))
        })
    }

    fn event() -> DomainEvent {
        DomainEvent::builder().event_id("b-1").event_type("booking.created").build()
    }

    #[test]
    fn presets() {
        let critical = ErrorHandlingOptions::critical();
        assert!(!critical.suppress_errors);
        assert_eq!(critical.retry.as_ref().and_then(|r| r.max_retries), Some(5));

        let non_critical = ErrorHandlingOptions::non_critical();
        assert!(non_critical.suppress_errors);
        assert_eq!(non_critical.log_level, ErrorLogLevel::Warn);

        let analytics = ErrorHandlingOptions::analytics();
        assert_eq!(analytics.log_level, ErrorLogLevel::Debug);
        assert_eq!(analytics.retry.as_ref().and_then(|r| r.base_delay_ms), Some(5000));
    }

    #[tokio::test]
    async fn success_passes_through() {
        let handler = ErrorHandled::new(
            handler_fn("ok", HandledEventType::All, |_event| async { Ok(()) }),
            ErrorHandlingOptions::critical(),
        );
        handler.handle(&event()).await.unwrap();
        assert_eq!(handler.handler_name(), "ok");
        assert_eq!(handler.handled_event_type(), HandledEventType::All);
    }

    #[tokio::test]
    async fn suppressed_failure_schedules_retry_and_emits_notice() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let retry = Arc::new(RetryCoordinator::new(
            Arc::downgrade(&dispatcher),
            RetryConfig::default(),
        ));
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = notices.clone();
        dispatcher.subscribe(
            HANDLER_ERROR_CHANNEL,
            Arc::new(handler_fn("monitor", HandledEventType::All, move |event| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(HandlerErrorNotice::from_event(&event)?);
                    Ok(())
                }
            })),
        );
        let custom_calls = Arc::new(AtomicUsize::new(0));
        let counter = custom_calls.clone();

        let handler = ErrorHandled::new(
            failing("TimeoutError"),
            ErrorHandlingOptions::non_critical().with_custom_handler(Arc::new(
                move |_err: &anyhow::Error, _event: &DomainEvent| -> anyhow::Result<()> {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("custom handler is broken too")
                },
            )),
        )
        .with_retry(retry.clone())
        .with_emitter(&dispatcher);

        handler.handle(&event()).await.unwrap();

        assert_eq!(custom_calls.load(Ordering::SeqCst), 1);
        let entries = retry.get_failed_events();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "b-1-mailer");
        assert_eq!(entries[0].config.max_retries, 2);
        let notices = notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].handler, "mailer");
        assert_eq!(notices[0].error, "TimeoutError: smtp down");
    }

    #[tokio::test]
    async fn surfaced_failure_is_marked_as_routed() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let retry = Arc::new(RetryCoordinator::new(
            Arc::downgrade(&dispatcher),
            RetryConfig::default(),
        ));
        let handler = ErrorHandled::new(failing("ConnectionError"), ErrorHandlingOptions::critical())
            .with_retry(retry.clone());

        let err = handler.handle(&event()).await.unwrap_err();

        assert!(RoutedFailure::is_routed(&err));
        assert!(err.downcast_ref::<HandlerError>().is_some());
        assert_eq!(retry.get_failed_events()[0].config.max_retries, 5);
    }

    #[tokio::test]
    async fn without_retry_the_error_is_returned_unchanged() {
        let handler = ErrorHandled::new(failing("ValidationError"), ErrorHandlingOptions::default());

        let err = handler.handle(&event()).await.unwrap_err();

        assert!(!RoutedFailure::is_routed(&err));
        assert_eq!(err.to_string(), "ValidationError: smtp down");
    }
}
