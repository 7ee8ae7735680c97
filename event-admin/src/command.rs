//! 管理命令：会改变事件存储或重试状态的运维操作（重放、清理、手动重试）
//!
use crate::{context::AppContext, dto::Dto, error::AppError};
use async_trait::async_trait;

/// 管理命令
///
/// `NAME` 是命令的稳定名称，用于注册表与审计日志，避免依赖 `type_name::<T>()`。
pub trait Command: Send + Sync + 'static {
    const NAME: &'static str;

    /// 执行结果（计数、说明文本等）
    type Output: Dto;
}

#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    async fn handle(&self, ctx: &AppContext, cmd: C) -> Result<C::Output, AppError>;
}

/// 按命令类型路由到已注册的处理器
///
/// 方法带泛型参数，不能作为 trait object 使用，按具体类型注入。
#[async_trait]
pub trait CommandBus: Send + Sync {
    async fn dispatch<C: Command>(&self, ctx: &AppContext, cmd: C) -> Result<C::Output, AppError>;
}
