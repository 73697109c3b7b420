use thiserror::Error;

/// 任务引擎错误类型定义
///
/// 存储层的乐观锁冲突不属于错误，由仓储接口以 `CasOutcome::Conflict` 返回。
#[derive(Debug, Error)]
pub enum TaskflowError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务实例未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("子任务实例未找到: {id}")]
    SubtaskNotFound { id: i64 },

    #[error("任务定义未找到: {id}")]
    DefinitionNotFound { id: i64 },

    #[error("任务模板未找到: {name}")]
    TemplateNotFound { name: String },

    #[error("子任务动作未找到: {name}")]
    ActionNotFound { name: String },

    #[error("重复注册: {0}")]
    DuplicateRegistration(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的调度规则: {rule} - {message}")]
    InvalidSchedule { rule: String, message: String },

    #[error("检测到循环依赖")]
    CircularDependency,

    #[error("无效的任务模板: {0}")]
    InvalidTemplate(String),

    #[error("不允许的操作: {0}")]
    InvalidOperation(String),

    #[error("子任务执行超时")]
    ExecutionTimeout,

    #[error("子任务已被取消")]
    Cancelled,

    #[error("子任务执行错误: {0}")]
    TaskExecution(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl TaskflowError {
    pub fn task_execution(message: impl Into<String>) -> Self {
        Self::TaskExecution(message.into())
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// 是否为调度配置错误（定义需要被禁用，而不是下一轮重试）
    pub fn is_malformed_schedule(&self) -> bool {
        matches!(self, Self::InvalidCron { .. } | Self::InvalidSchedule { .. })
    }
}

impl From<serde_json::Error> for TaskflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type TaskflowResult<T> = std::result::Result<T, TaskflowError>;
