//! 重试协调器（RetryCoordinator）
//!
//! 将处理器失败与发布路径解耦：按 `"{event_id}-{handler}"` 跟踪失败，
//! 以指数退避 + 抖动安排重试，超过上限或遇到不可重试错误时转入死信。
//!
//! - 失败表为进程内状态，重启即丢失（只有死信通知与存储记录会保留下来）；
//! - 周期清扫在重新分发前先从表中原子地移出条目，同一键最多一个在途重试；
//! - 在途期间保留重试计数，因此重试失败会继续累加而不是从头开始。
//!
use crate::domain_event::{DEAD_LETTER_CHANNEL, DeadLetterNotice, DomainEvent};
use crate::error::handler_error_kinds;
use crate::eventing::EventDispatcher;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Weak;
use std::time::Duration;

/// 重试策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// 可重试错误白名单（类型名或消息子串）；为空表示全部可重试
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            retryable_errors: vec![
                "TimeoutError".to_string(),
                "ConnectionError".to_string(),
                "ServiceUnavailableError".to_string(),
                "TemporaryError".to_string(),
            ],
        }
    }
}

impl RetryConfig {
    /// 第 `retry_count` 次重试（从 1 开始）的基础延迟，不含抖动
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powf(f64::from(exponent));
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// 基础延迟再加上至多 10% 的随机抖动
    pub fn jittered_delay(&self, retry_count: u32) -> Duration {
        let delay = self.delay_for_attempt(retry_count).as_millis() as f64;
        let jitter = rand::thread_rng().gen_range(0.0..0.1) * delay;
        Duration::from_millis((delay + jitter).floor() as u64)
    }

    pub fn is_retryable(&self, error: &anyhow::Error) -> bool {
        if self.retryable_errors.is_empty() {
            return true;
        }
        let kinds = handler_error_kinds(error);
        let message = format!("{error:#}");
        self.retryable_errors.iter().any(|candidate| {
            kinds.iter().any(|kind| kind.contains(candidate.as_str()))
                || message.contains(candidate.as_str())
        })
    }

    /// 以局部覆盖生成新的策略
    pub fn merged(&self, patch: &RetryConfigPatch) -> RetryConfig {
        RetryConfig {
            max_retries: patch.max_retries.unwrap_or(self.max_retries),
            base_delay_ms: patch.base_delay_ms.unwrap_or(self.base_delay_ms),
            max_delay_ms: patch.max_delay_ms.unwrap_or(self.max_delay_ms),
            backoff_multiplier: patch.backoff_multiplier.unwrap_or(self.backoff_multiplier),
            retryable_errors: patch
                .retryable_errors
                .clone()
                .unwrap_or_else(|| self.retryable_errors.clone()),
        }
    }
}

/// 对默认策略的局部覆盖
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfigPatch {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub retryable_errors: Option<Vec<String>>,
}

/// 失败表中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEventEntry {
    pub id: String,
    pub event: DomainEvent,
    pub event_type: String,
    pub handler: String,
    pub error: String,
    pub retry_count: u32,
    pub last_attempt: DateTime<Utc>,
    pub next_retry: Option<DateTime<Utc>>,
    pub config: RetryConfig,
}

/// 失败表统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryStatistics {
    pub total_failed_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub events_by_handler: BTreeMap<String, usize>,
    pub average_retry_count: f64,
}

/// `handle_failed_event` 的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// 已安排第 n 次重试
    Scheduled { retry_count: u32, delay: Duration },
    /// 已转入死信
    DeadLettered { retry_count: u32 },
}

/// 标记：该失败已由包装层交给重试协调器，上游不应再次登记
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedFailure {
    pub handler: String,
}

impl fmt::Display for RoutedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler {} failed; routed to retry coordinator", self.handler)
    }
}

impl RoutedFailure {
    pub fn is_routed(error: &anyhow::Error) -> bool {
        error.downcast_ref::<RoutedFailure>().is_some()
    }

    /// 该错误是否已由指定处理器的包装层登记
    pub fn is_routed_for(error: &anyhow::Error, handler: &str) -> bool {
        error
            .downcast_ref::<RoutedFailure>()
            .is_some_and(|routed| routed.handler == handler)
    }
}

pub fn retry_key(event_id: &str, handler: &str) -> String {
    format!("{event_id}-{handler}")
}

/// 重新分发只发往事件类型通道；订阅全部事件的处理器在该通道上收不到
fn reaches_handler(dispatcher: &EventDispatcher, entry: &FailedEventEntry) -> bool {
    dispatcher
        .handlers_for(&entry.event_type)
        .iter()
        .any(|h| h.handler_name() == entry.handler)
}

pub struct RetryCoordinator {
    dispatcher: Weak<EventDispatcher>,
    default_config: RetryConfig,
    failed_events: DashMap<String, FailedEventEntry>,
    in_flight: DashMap<String, u32>,
}

impl RetryCoordinator {
    /// 分发器以弱引用持有：分发器中的包装处理器反过来持有本协调器
    pub fn new(dispatcher: Weak<EventDispatcher>, default_config: RetryConfig) -> Self {
        Self {
            dispatcher,
            default_config,
            failed_events: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn default_config(&self) -> &RetryConfig {
        &self.default_config
    }

    /// 登记一次处理器失败：不可重试或超过上限则转入死信，否则安排下一次重试
    pub async fn handle_failed_event(
        &self,
        event: &DomainEvent,
        event_type: &str,
        handler: &str,
        error: &anyhow::Error,
        config: Option<&RetryConfigPatch>,
    ) -> FailureDisposition {
        let config = match config {
            Some(patch) => self.default_config.merged(patch),
            None => self.default_config.clone(),
        };
        let key = retry_key(event.event_id(), handler);

        if !config.is_retryable(error) {
            tracing::warn!(
                event_id = event.event_id(),
                event_type,
                handler,
                error = %format!("{error:#}"),
                "non-retryable error"
            );
            self.failed_events.remove(&key);
            self.dead_letter(event, event_type, handler, error, 0).await;
            return FailureDisposition::DeadLettered { retry_count: 0 };
        }

        let previous = self
            .failed_events
            .get(&key)
            .map(|entry| entry.retry_count)
            .or_else(|| self.in_flight.get(&key).map(|count| *count))
            .unwrap_or(0);
        let retry_count = previous + 1;

        if retry_count > config.max_retries {
            self.failed_events.remove(&key);
            self.dead_letter(event, event_type, handler, error, retry_count)
                .await;
            return FailureDisposition::DeadLettered { retry_count };
        }

        let delay = config.jittered_delay(retry_count);
        let now = Utc::now();
        let next_retry = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d));

        tracing::warn!(
            event_id = event.event_id(),
            event_type,
            handler,
            retry_count,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %format!("{error:#}"),
            "scheduling event retry"
        );

        self.failed_events.insert(
            key.clone(),
            FailedEventEntry {
                id: key,
                event: event.clone(),
                event_type: event_type.to_string(),
                handler: handler.to_string(),
                error: format!("{error:#}"),
                retry_count,
                last_attempt: now,
                next_retry,
                config,
            },
        );

        FailureDisposition::Scheduled { retry_count, delay }
    }

    /// 清扫一次到期条目，返回重新分发的条目数
    pub async fn process_due_retries(&self) -> usize {
        let now = Utc::now();
        let due: Vec<String> = self
            .failed_events
            .iter()
            .filter(|entry| entry.next_retry.is_some_and(|at| at <= now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut processed = 0;
        for key in due {
            // 其它路径（手动重试/清空）可能已移走该条目
            let Some((key, entry)) = self.failed_events.remove(&key) else {
                continue;
            };
            processed += 1;
            self.re_emit(&key, entry).await;
        }
        processed
    }

    /// 立即重试指定条目；条目存在且本次重新分发成功时返回 true
    pub async fn manual_retry(&self, key: &str) -> bool {
        let Some((key, entry)) = self.failed_events.remove(key) else {
            tracing::warn!(key, "manual retry requested for unknown entry");
            return false;
        };
        tracing::info!(key = %key, handler = %entry.handler, "manual retry");
        self.re_emit(&key, entry).await
    }

    async fn re_emit(&self, key: &str, entry: FailedEventEntry) -> bool {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            tracing::warn!(key, "dispatcher dropped; retry entry restored");
            self.failed_events.insert(key.to_string(), entry);
            return false;
        };

        let reachable = reaches_handler(&dispatcher, &entry);
        self.in_flight.insert(key.to_string(), entry.retry_count);
        let result = dispatcher.emit(&entry.event_type, &entry.event).await;
        let succeeded = match result {
            Ok(()) => !self.failed_events.contains_key(key),
            Err(err) => {
                // 先失败的可能是同通道的另一个处理器，本条目仍需按自身处理器重新登记
                if !RoutedFailure::is_routed_for(&err, &entry.handler) {
                    let patch = RetryConfigPatch {
                        max_retries: Some(entry.config.max_retries),
                        base_delay_ms: Some(entry.config.base_delay_ms),
                        max_delay_ms: Some(entry.config.max_delay_ms),
                        backoff_multiplier: Some(entry.config.backoff_multiplier),
                        retryable_errors: Some(entry.config.retryable_errors.clone()),
                    };
                    self.handle_failed_event(
                        &entry.event,
                        &entry.event_type,
                        &entry.handler,
                        &err,
                        Some(&patch),
                    )
                    .await;
                }
                false
            }
        };
        self.in_flight.remove(key);

        if succeeded && reachable {
            tracing::info!(
                event_id = entry.event.event_id(),
                handler = %entry.handler,
                retry_count = entry.retry_count,
                "event retry succeeded"
            );
        } else if succeeded {
            tracing::info!(
                event_id = entry.event.event_id(),
                handler = %entry.handler,
                event_type = %entry.event_type,
                retry_count = entry.retry_count,
                "event re-emitted; handler not subscribed on event type channel"
            );
        }
        succeeded
    }

    async fn dead_letter(
        &self,
        event: &DomainEvent,
        event_type: &str,
        handler: &str,
        error: &anyhow::Error,
        retry_count: u32,
    ) {
        let notice = DeadLetterNotice {
            event_id: event.event_id().to_string(),
            event_type: event_type.to_string(),
            handler: handler.to_string(),
            error: format!("{error:#}"),
            error_detail: format!("{error:?}"),
            retry_count,
            original_event: event.clone(),
            timestamp: Utc::now(),
        };

        tracing::error!(
            event_id = %notice.event_id,
            event_type = %notice.event_type,
            handler = %notice.handler,
            retry_count,
            error = %notice.error,
            error_detail = %notice.error_detail,
            "event moved to dead letter"
        );

        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return;
        };
        let emitted = match notice.to_event() {
            Ok(dead_letter) => dispatcher.emit(DEAD_LETTER_CHANNEL, &dead_letter).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = emitted {
            tracing::warn!(event_id = %notice.event_id, error = %err, "failed to emit dead letter notice");
        }
    }

    pub fn get_retry_statistics(&self) -> RetryStatistics {
        let mut stats = RetryStatistics::default();
        let mut total_retries: u64 = 0;
        for entry in self.failed_events.iter() {
            stats.total_failed_events += 1;
            *stats
                .events_by_type
                .entry(entry.event_type.clone())
                .or_default() += 1;
            *stats
                .events_by_handler
                .entry(entry.handler.clone())
                .or_default() += 1;
            total_retries += u64::from(entry.retry_count);
        }
        if stats.total_failed_events > 0 {
            stats.average_retry_count = total_retries as f64 / stats.total_failed_events as f64;
        }
        stats
    }

    /// 失败表快照（按下次重试时间排序）
    pub fn get_failed_events(&self) -> Vec<FailedEventEntry> {
        let mut entries: Vec<FailedEventEntry> =
            self.failed_events.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.next_retry.cmp(&b.next_retry).then_with(|| a.id.cmp(&b.id)));
        entries
    }

    /// 清空失败表，返回被丢弃的条目数
    pub fn clear_failed_events(&self) -> usize {
        let cleared = self.failed_events.len();
        self.failed_events.clear();
        tracing::warn!(cleared, "failed events cleared");
        cleared
    }
}
