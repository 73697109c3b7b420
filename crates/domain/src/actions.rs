//! 可插拔的业务协作者
//!
//! 引擎本身不关心子任务具体做什么，只通过以下接口与业务代码交互：
//! - [`SubtaskAction`] - 子任务的执行与回滚逻辑，以及静态的重试预算和超时
//! - [`TaskSchedule`] - 任务模板：是否就绪、DAG 蓝图、初始参数
//! - [`PostTaskHook`] - 任务结束后的通知

use std::sync::Arc;

use async_trait::async_trait;
use taskflow_core::TaskflowResult;
use tracing::warn;

use crate::context::TaskContext;
use crate::entities::TaskInstanceOverview;
use crate::repositories::TaskStore;
use crate::template::{Argument, TaskTemplate};

/// 子任务动作执行时可见的信息
pub struct SubtaskContext {
    pub subtask_id: i64,
    pub task_id: i64,
    pub parallel_idx: i32,
    /// 当前执行次数（从1开始）
    pub attempt: i32,
    /// 合并了上游产出后的上下文
    pub context: TaskContext,
    pub logger: SubtaskLogger,
}

/// 把日志追加到当前子任务、当前执行次数下
#[derive(Clone)]
pub struct SubtaskLogger {
    subtask_id: i64,
    run_time: i32,
    repo: Arc<dyn TaskStore>,
}

impl SubtaskLogger {
    pub fn new(subtask_id: i64, run_time: i32, repo: Arc<dyn TaskStore>) -> Self {
        Self {
            subtask_id,
            run_time,
            repo,
        }
    }

    /// 尽力写入，失败只记录告警
    pub async fn log(&self, content: impl AsRef<str>) {
        if let Err(e) = self
            .repo
            .append_log(self.subtask_id, self.run_time, content.as_ref())
            .await
        {
            warn!("写入子任务 {} 日志失败: {}", self.subtask_id, e);
        }
    }
}

/// 子任务动作
///
/// 执行语义为至少一次：动作需要自行保证幂等。取消通过中断执行中的 future 实现，
/// 动作应在 `.await` 处允许被中断。
#[async_trait]
pub trait SubtaskAction: Send + Sync {
    /// 注册名称，模板通过该名称引用动作
    fn name(&self) -> &str;

    /// 正向执行，返回需要写回子任务的上下文
    async fn execute(&self, ctx: SubtaskContext) -> TaskflowResult<TaskContext>;

    /// 逆向回滚，默认什么也不做
    async fn rollback(&self, ctx: SubtaskContext) -> TaskflowResult<TaskContext> {
        Ok(ctx.context)
    }

    /// 失败后允许的重试次数
    fn retry_count(&self) -> i32 {
        0
    }

    fn timeout_seconds(&self) -> i64 {
        300
    }
}

/// 可被定时调度或手动提交的任务模板
#[async_trait]
pub trait TaskSchedule: Send + Sync {
    /// 当前是否允许物化新的任务实例
    async fn ready(&self) -> bool {
        true
    }

    fn template(&self) -> TaskTemplate;

    fn argument(&self) -> Argument;
}

/// 任务到达终态后的通知，调用失败不会影响任务状态
#[async_trait]
pub trait PostTaskHook: Send + Sync {
    async fn accept(&self, overview: &TaskInstanceOverview) -> TaskflowResult<()>;
}
