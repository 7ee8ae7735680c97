//! 事件引擎（EventEngine）
//!
//! 事件子系统的组装入口：
//! - 由仓储构建存储服务、分发器、持久化总线与重试协调器；
//! - 注册初始处理器，并为处理器套上错误处理包装；
//! - 启动周期性的重试清扫，返回可关闭/等待的 `EngineHandle`。
//!
use super::{
    DurableEventBus, ErrorHandled, ErrorHandlingOptions, EventDispatcher, EventHandler,
    RetryConfig, RetryCoordinator,
};
use crate::event_store::{DEFAULT_REPLAY_LIMIT, DEFAULT_RETENTION_DAYS, EventStore};
use crate::persist::EventRecordRepository;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 事件引擎配置
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EventEngineConfig {
    /// 重试清扫间隔
    pub sweep_interval: Duration,
    /// 重放未指定 limit 时的默认条数
    pub default_replay_limit: usize,
    /// 清理未指定保留天数时的默认值
    pub default_retention_days: u32,
}

impl Default for EventEngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            default_replay_limit: DEFAULT_REPLAY_LIMIT,
            default_retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

pub struct EventEngine {
    dispatcher: Arc<EventDispatcher>,
    store: Arc<EventStore>,
    bus: Arc<DurableEventBus>,
    retry: Arc<RetryCoordinator>,
    config: EventEngineConfig,
}

#[bon::bon]
impl EventEngine {
    #[builder]
    pub fn new(
        repository: Arc<dyn EventRecordRepository>,
        #[builder(default)] config: EventEngineConfig,
        #[builder(default)] retry_config: RetryConfig,
        #[builder(default)] handlers: Vec<Arc<dyn EventHandler>>,
    ) -> Self {
        let dispatcher = Arc::new(EventDispatcher::with_handlers(handlers));
        let store = Arc::new(
            EventStore::builder()
                .repository(repository)
                .dispatcher(dispatcher.clone())
                .default_replay_limit(config.default_replay_limit)
                .build(),
        );
        let bus = Arc::new(DurableEventBus::new(store.clone(), dispatcher.clone()));
        let retry = Arc::new(RetryCoordinator::new(
            Arc::downgrade(&dispatcher),
            retry_config,
        ));

        Self {
            dispatcher,
            store,
            bus,
            retry,
            config,
        }
    }
}

impl EventEngine {
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<DurableEventBus> {
        &self.bus
    }

    pub fn retry(&self) -> &Arc<RetryCoordinator> {
        &self.retry
    }

    pub fn config(&self) -> &EventEngineConfig {
        &self.config
    }

    /// 为处理器套上错误处理包装，并接入本引擎的重试协调器与通知通道
    pub fn error_handled<H: EventHandler>(
        &self,
        inner: H,
        options: ErrorHandlingOptions,
    ) -> ErrorHandled<H> {
        ErrorHandled::new(inner, options)
            .with_retry(self.retry.clone())
            .with_emitter(&self.dispatcher)
    }

    /// 启动重试清扫，返回可用于关闭/等待的句柄
    pub fn start(&self) -> EngineHandle {
        let token = CancellationToken::new();
        let retry = self.retry.clone();

        let sweep = Self::spawn_periodic(token.clone(), self.config.sweep_interval, move || {
            let retry = retry.clone();
            async move {
                let processed = retry.process_due_retries().await;
                if processed > 0 {
                    tracing::debug!(processed, "retry sweep finished");
                }
            }
        });

        EngineHandle {
            token,
            tasks: vec![sweep],
        }
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }
}

/// 引擎运行句柄：用于优雅关闭与等待任务结束
pub struct EngineHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_event::{DomainEvent, EventContext};
    use crate::eventing::{EventBus, HandledEventType, handler_fn};
    use crate::persist::{EventStatus, InMemoryEventRecordRepository};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread")]
    async fn sweep_retries_a_flaky_handler_until_it_succeeds() {
        let repo = Arc::new(InMemoryEventRecordRepository::new());
        let engine = EventEngine::builder()
            .repository(repo.clone())
            .config(EventEngineConfig {
                sweep_interval: Duration::from_millis(20),
                ..Default::default()
            })
            .retry_config(RetryConfig {
                base_delay_ms: 10,
                max_delay_ms: 10,
                retryable_errors: vec![],
                ..Default::default()
            })
            .build();

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let flaky = handler_fn(
            "invoice",
            HandledEventType::One("payment.completed".into()),
            move |_event| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        anyhow::bail!("TemporaryError: ledger busy");
                    }
                    Ok(())
                }
            },
        );
        engine
            .dispatcher()
            .register(Arc::new(engine.error_handled(
                flaky,
                ErrorHandlingOptions::builder().suppress_errors(true).build(),
            )));

        let handle = engine.start();
        let event = DomainEvent::builder().event_id("p-1").event_type("payment.completed").build();
        engine.bus().publish(&event, &EventContext::default()).await.unwrap();

        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            while attempts.load(Ordering::SeqCst) < 3 || !engine.retry().get_failed_events().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        handle.shutdown();
        handle.join().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(engine.retry().get_failed_events().is_empty());
        assert_eq!(repo.records().await[0].status(), EventStatus::Processed);
    }

    #[test]
    fn default_config() {
        let config = EventEngineConfig::default();
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.default_replay_limit, 1000);
        assert_eq!(config.default_retention_days, 90);
    }
}
