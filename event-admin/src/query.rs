//! 管理查询：只读地查看事件记录、事件流、完整性与失败表
//!
use crate::{context::AppContext, dto::Dto, error::AppError};
use async_trait::async_trait;

pub trait Query: Send + Sync + 'static {
    const NAME: &'static str;

    type Dto: Dto;
}

#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    async fn handle(&self, ctx: &AppContext, q: Q) -> Result<Q::Dto, AppError>;
}

#[async_trait]
pub trait QueryBus: Send + Sync {
    async fn dispatch<Q: Query>(&self, ctx: &AppContext, q: Q) -> Result<Q::Dto, AppError>;
}
