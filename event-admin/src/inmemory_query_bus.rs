use crate::{
    context::AppContext,
    error::AppError,
    query::{Query, QueryBus, QueryHandler},
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::any::{Any, TypeId, type_name};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxAnySend = Box<dyn Any + Send>;

type QueryHandlerFuture = Pin<Box<dyn Future<Output = Result<BoxAnySend, AppError>> + Send>>;

type QueryHandlerFn = Arc<dyn Fn(BoxAnySend, AppContext) -> QueryHandlerFuture + Send + Sync>;

/// 进程内查询总线：按查询类型的 `TypeId` 保存擦除类型后的处理闭包
pub struct InMemoryQueryBus {
    handlers: DashMap<TypeId, (&'static str, QueryHandlerFn)>,
}

impl Default for InMemoryQueryBus {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}

impl InMemoryQueryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册查询处理器；同一查询重复注册返回错误
    pub fn register<Q, H>(&self, handler: Arc<H>) -> Result<(), AppError>
    where
        Q: Query,
        H: QueryHandler<Q> + 'static,
    {
        let f: QueryHandlerFn = Arc::new(move |boxed_q: BoxAnySend, ctx: AppContext| -> QueryHandlerFuture {
            let handler = handler.clone();

            Box::pin(async move {
                match boxed_q.downcast::<Q>() {
                    Ok(q) => {
                        let dto = handler.handle(&ctx, *q).await?;
                        Ok(Box::new(dto) as BoxAnySend)
                    }
                    Err(_) => Err(AppError::TypeMismatch {
                        expected: Q::NAME,
                        found: "unknown",
                    }),
                }
            })
        });

        match self.handlers.entry(TypeId::of::<Q>()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AppError::AlreadyRegisteredQuery { query: Q::NAME }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert((Q::NAME, f));
                Ok(())
            }
        }
    }

    /// 获取已注册的查询名列表（只读视图）
    pub fn registered_queries(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.iter().map(|e| e.value().0).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl QueryBus for InMemoryQueryBus {
    async fn dispatch<Q: Query>(&self, ctx: &AppContext, q: Q) -> Result<Q::Dto, AppError> {
        let Some(f) = self.handlers.get(&TypeId::of::<Q>()).map(|h| h.1.clone()) else {
            return Err(AppError::HandlerNotFound(Q::NAME));
        };

        tracing::debug!(query = Q::NAME, operator = ctx.operator(), "dispatching query");
        let out = (f)(Box::new(q), ctx.clone()).await?;

        match out.downcast::<Q::Dto>() {
            Ok(dto) => Ok(*dto),
            Err(_) => Err(AppError::TypeMismatch {
                expected: type_name::<Q::Dto>(),
                found: "unknown",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::Dto;
    use serde::Serialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    /// 某个事件类型当前的失败条目数
    struct CountFailures {
        event_type: &'static str,
    }

    #[derive(Debug, Serialize, PartialEq)]
    struct FailureCount {
        event_type: &'static str,
        count: usize,
    }
    impl Dto for FailureCount {}

    impl Query for CountFailures {
        const NAME: &'static str = "CountFailures";
        type Dto = FailureCount;
    }

    #[derive(Default)]
    struct FailureCounter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryHandler<CountFailures> for FailureCounter {
        async fn handle(&self, _ctx: &AppContext, q: CountFailures) -> Result<FailureCount, AppError> {
            let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(FailureCount {
                event_type: q.event_type,
                count,
            })
        }
    }

    #[tokio::test]
    async fn dispatch_routes_by_query_type() {
        let bus = InMemoryQueryBus::new();
        let err = bus
            .dispatch(&AppContext::default(), CountFailures { event_type: "booking.created" })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::HandlerNotFound("CountFailures")));

        bus.register::<CountFailures, _>(Arc::new(FailureCounter::default()))
            .unwrap();
        let dto = bus
            .dispatch(&AppContext::default(), CountFailures { event_type: "booking.created" })
            .await
            .unwrap();
        assert_eq!(
            dto,
            FailureCount {
                event_type: "booking.created",
                count: 1
            }
        );

        let err = bus
            .register::<CountFailures, _>(Arc::new(FailureCounter::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::AlreadyRegisteredQuery { query: "CountFailures" }
        ));
        assert_eq!(bus.registered_queries(), vec!["CountFailures"]);
    }

    #[tokio::test]
    async fn mismatched_result_type_is_reported() {
        let bus = InMemoryQueryBus::new();
        let f: QueryHandlerFn = Arc::new(|_q: BoxAnySend, _ctx: AppContext| -> QueryHandlerFuture {
            Box::pin(async move { Ok(Box::new("not a dto") as BoxAnySend) })
        });
        bus.handlers
            .insert(TypeId::of::<CountFailures>(), (CountFailures::NAME, f));

        let err = bus
            .dispatch(&AppContext::default(), CountFailures { event_type: "payment.completed" })
            .await
            .unwrap_err();
        assert!(
            matches!(err, AppError::TypeMismatch { expected, .. } if expected.contains("FailureCount"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dispatch_shares_one_handler() {
        let bus = Arc::new(InMemoryQueryBus::new());
        bus.register::<CountFailures, _>(Arc::new(FailureCounter::default()))
            .unwrap();

        let mut set = JoinSet::new();
        for _ in 0..50 {
            let bus = bus.clone();
            set.spawn(async move {
                bus.dispatch(&AppContext::default(), CountFailures { event_type: "booking.cancelled" })
                    .await
                    .map(|dto| dto.count)
            });
        }
        let mut counts = Vec::new();
        while let Some(res) = set.join_next().await {
            counts.push(res.unwrap().unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=50).collect::<Vec<_>>());
    }
}
