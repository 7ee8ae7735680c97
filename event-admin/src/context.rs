use event_core::domain_event::EventContext;

/// 应用层上下文（Application Context）
///
/// 承载一次管理调用（命令/查询）所需的横切信息：
/// - 事件语境（`EventContext`）：关联追踪 `correlation_id`、因果链 `causation_id`、用户与会话；
/// - 操作人（`operator`）：写入审计日志。
///
/// 典型用法：
/// ```rust
/// use event_admin::context::AppContext;
/// use event_core::domain_event::EventContext;
///
/// let ctx = AppContext {
///     event: EventContext::builder()
///         .correlation_id("cor-123")
///         .user_id("admin-1")
///         .build(),
///     operator: Some("ops@coworking.example".into()),
/// };
/// assert_eq!(ctx.operator(), "ops@coworking.example");
/// ```
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    pub event: EventContext,
    pub operator: Option<String>,
}

impl AppContext {
    /// 审计日志中的操作人；未提供时退回事件语境中的用户，再退回 `system`
    pub fn operator(&self) -> &str {
        self.operator
            .as_deref()
            .or(self.event.user_id())
            .unwrap_or("system")
    }
}
