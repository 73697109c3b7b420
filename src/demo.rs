//! 内置的演示动作与模板
//!
//! 引擎不包含业务动作，二进制程序注册这些演示实现以便开箱运行：
//! - `noop` - 记录一行日志后立即成功
//! - `sleep` - 按上下文中的 `sleep_seconds` 睡眠，用于观察超时与取消
//! - `demo_chain` - `prepare -> work(x2) -> finish`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use taskflow_core::TaskflowResult;
use taskflow_domain::actions::{PostTaskHook, SubtaskAction, SubtaskContext, TaskSchedule};
use taskflow_domain::entities::TaskInstanceOverview;
use taskflow_domain::registry::{ActionRegistry, TemplateRegistry};
use taskflow_domain::template::{Argument, TaskTemplate};
use taskflow_domain::TaskContext;

pub struct NoopAction;

#[async_trait]
impl SubtaskAction for NoopAction {
    fn name(&self) -> &str {
        "noop"
    }

    async fn execute(&self, ctx: SubtaskContext) -> TaskflowResult<TaskContext> {
        ctx.logger
            .log(format!("noop 第 {} 次执行", ctx.attempt))
            .await;
        Ok(ctx.context)
    }

    async fn rollback(&self, ctx: SubtaskContext) -> TaskflowResult<TaskContext> {
        ctx.logger.log("noop 回滚").await;
        Ok(ctx.context)
    }
}

pub struct SleepAction;

#[async_trait]
impl SubtaskAction for SleepAction {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, ctx: SubtaskContext) -> TaskflowResult<TaskContext> {
        let seconds = ctx.context.get_i64("sleep_seconds").unwrap_or(1).max(0) as u64;
        ctx.logger
            .log(format!("分片 {} 睡眠 {} 秒", ctx.parallel_idx, seconds))
            .await;
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        Ok(ctx
            .context
            .with(format!("slept_{}", ctx.parallel_idx), seconds))
    }

    fn retry_count(&self) -> i32 {
        1
    }

    fn timeout_seconds(&self) -> i64 {
        60
    }
}

struct DemoChain;

#[async_trait]
impl TaskSchedule for DemoChain {
    fn template(&self) -> TaskTemplate {
        TaskTemplate::builder("demo_chain")
            .subtask("prepare", "noop")
            .parallel_subtask("work", "sleep", 2)
            .subtask("finish", "noop")
            .chain(&["prepare", "work", "finish"])
            .build()
    }

    fn argument(&self) -> Argument {
        Argument::default()
            .with_concurrency(2)
            .with_context(TaskContext::new().with("sleep_seconds", 1))
    }
}

/// 任务结束时输出一行概览
pub struct LogHook;

#[async_trait]
impl PostTaskHook for LogHook {
    async fn accept(&self, overview: &TaskInstanceOverview) -> TaskflowResult<()> {
        info!(
            "任务 {}({}) {} 结束: {}，成功 {}/{}，失败 {}",
            overview.name,
            overview.id,
            overview.operation,
            overview.state,
            overview.successful_subtasks,
            overview.total_subtasks,
            overview.failed_subtasks
        );
        Ok(())
    }
}

pub fn registries() -> TaskflowResult<(ActionRegistry, TemplateRegistry)> {
    let mut actions = ActionRegistry::new();
    actions.register(Arc::new(NoopAction))?;
    actions.register(Arc::new(SleepAction))?;

    let mut templates = TemplateRegistry::new();
    templates.register("demo_chain", Arc::new(DemoChain))?;
    Ok((actions, templates))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_template_expands_fan_out() {
        let (actions, templates) = registries().unwrap();
        let schedule = templates.require("demo_chain").unwrap();
        let subtasks = schedule
            .template()
            .generate_subtasks(&schedule.argument(), &actions)
            .unwrap();

        assert_eq!(subtasks.len(), 4);
        let workers: Vec<i32> = subtasks
            .iter()
            .filter(|s| s.name == "work")
            .map(|s| s.parallel_idx)
            .collect();
        assert_eq!(workers, vec![0, 1]);
        let finish = subtasks.iter().find(|s| s.name == "finish").unwrap();
        assert_eq!(finish.upstreams.len(), 2);
    }
}
