use crate::{
    command::{Command, CommandBus, CommandHandler},
    context::AppContext,
    error::AppError,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxAnySend = Box<dyn Any + Send>;

type CmdHandlerFuture = Pin<Box<dyn Future<Output = Result<BoxAnySend, AppError>> + Send>>;

type CmdHandlerFn = Arc<dyn Fn(BoxAnySend, AppContext) -> CmdHandlerFuture + Send + Sync>;

/// 基于内存的 CommandBus 实现
/// - 通过 TypeId 注册不同 Command 对应的 Handler
/// - 运行时以类型擦除（Any）方式进行调度
pub struct InMemoryCommandBus {
    handlers: DashMap<TypeId, (&'static str, CmdHandlerFn)>,
}

impl Default for InMemoryCommandBus {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}

impl InMemoryCommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册命令处理器；同一命令重复注册返回错误
    pub fn register<C, H>(&self, handler: Arc<H>) -> Result<(), AppError>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        let f: CmdHandlerFn = Arc::new(move |boxed_cmd: BoxAnySend, ctx: AppContext| -> CmdHandlerFuture {
            let handler = handler.clone();

            Box::pin(async move {
                // 键与闭包同一泛型 C，正常情况下 downcast 不会失败
                match boxed_cmd.downcast::<C>() {
                    Ok(cmd) => {
                        let out = handler.handle(&ctx, *cmd).await?;
                        Ok(Box::new(out) as BoxAnySend)
                    }
                    Err(_) => Err(AppError::TypeMismatch {
                        expected: C::NAME,
                        found: "unknown",
                    }),
                }
            })
        });

        match self.handlers.entry(TypeId::of::<C>()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(AppError::AlreadyRegisteredCommand { command: C::NAME })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert((C::NAME, f));
                Ok(())
            }
        }
    }

    /// 获取已注册的命令名列表（只读视图）
    pub fn registered_commands(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.iter().map(|e| e.value().0).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl CommandBus for InMemoryCommandBus {
    async fn dispatch<C: Command>(&self, ctx: &AppContext, cmd: C) -> Result<C::Output, AppError> {
        let Some(f) = self.handlers.get(&TypeId::of::<C>()).map(|h| h.1.clone()) else {
            return Err(AppError::HandlerNotFound(C::NAME));
        };

        tracing::debug!(command = C::NAME, operator = ctx.operator(), "dispatching command");
        let out = (f)(Box::new(cmd), ctx.clone()).await?;

        match out.downcast::<C::Output>() {
            Ok(output) => Ok(*output),
            Err(_) => Err(AppError::TypeMismatch {
                expected: std::any::type_name::<C::Output>(),
                found: "unknown",
            }),
        }
    }
}
