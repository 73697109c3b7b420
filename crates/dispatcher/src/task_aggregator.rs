use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, instrument, warn};

use taskflow_core::{Sweeper, TaskflowResult};
use taskflow_domain::actions::PostTaskHook;
use taskflow_domain::entities::{
    SubtaskInstance, SubtaskOperation, SubtaskState, TaskInstanceOverview, TaskOperation,
    TaskState,
};
use taskflow_domain::repositories::{CasOutcome, TaskStore};
use taskflow_infrastructure::{MetricsCollector, StructuredLogger};

use crate::concurrency_gate::ConcurrencyGate;

/// 任务汇总器
///
/// 对每个 RUNNING 任务：没有失败子任务时通过并发闸门推进任务图，
/// 然后根据子任务状态决定任务是否结束。
pub struct TaskAggregator {
    store: Arc<dyn TaskStore>,
    hooks: Vec<Arc<dyn PostTaskHook>>,
    metrics: Arc<MetricsCollector>,
}

impl TaskAggregator {
    pub fn new(store: Arc<dyn TaskStore>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            store,
            hooks: Vec::new(),
            metrics,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn PostTaskHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// 汇总所有运行中的任务，返回本轮结束的任务数
    pub async fn aggregate_running_tasks(&self) -> TaskflowResult<usize> {
        let task_ids = self.store.find_running_task_ids().await?;
        let mut finished = 0;

        for task_id in task_ids {
            match self.aggregate_task(task_id).await {
                Ok(Some(_)) => finished += 1,
                Ok(None) => {}
                Err(e) => error!("汇总任务 {} 失败: {}", task_id, e),
            }
        }
        Ok(finished)
    }

    /// 汇总单个任务，任务在本次调用中结束时返回其终态
    #[instrument(skip(self))]
    pub async fn aggregate_task(&self, task_id: i64) -> TaskflowResult<Option<TaskState>> {
        let mut task = match self.store.get_task(task_id).await? {
            Some(task) if task.is_running() => task,
            _ => return Ok(None),
        };

        let subtasks = self.store.find_subtasks_by_task(task_id).await?;
        let operation = task.operation;

        // 存在失败子任务时不再放行新的子任务，等待重试或任务失败
        if !subtasks.iter().any(|s| Self::is_failure_candidate(s, operation)) {
            ConcurrencyGate::apply(self.store.as_ref(), operation, &subtasks, task.concurrency)
                .await?;
        }

        let Some(state) = Self::resolve_state(operation, &subtasks) else {
            return Ok(None);
        };

        task.state = state;
        task.end_time = Some(Utc::now());
        match self.store.transition_task(&mut task, TaskState::Running).await? {
            CasOutcome::Applied => {
                StructuredLogger::log_task_finished(
                    task.id,
                    &task.name,
                    task.operation.as_str(),
                    task.state.as_str(),
                );
                self.metrics.record_task_finished(state == TaskState::Successful);
                self.notify_hooks(&TaskInstanceOverview::from_task(&task, &subtasks))
                    .await;
                Ok(Some(state))
            }
            CasOutcome::Conflict => {
                debug!("任务 {} 已被其他执行者推进", task_id);
                self.metrics.record_cas_conflict();
                Ok(None)
            }
        }
    }

    /// 在当前方向上算作失败的子任务（回滚方向上执行阶段的失败是待回滚节点）
    fn is_failure_candidate(subtask: &SubtaskInstance, operation: TaskOperation) -> bool {
        subtask.state == SubtaskState::Failed
            && (operation == TaskOperation::Execute
                || subtask.operation == SubtaskOperation::Rollback)
    }

    /// 根据子任务快照推导任务终态，仍需继续运行时返回 `None`
    ///
    /// 有子任务在运行时任务保持 RUNNING，即使已有不可重试的失败。
    pub fn resolve_state(
        operation: TaskOperation,
        subtasks: &[SubtaskInstance],
    ) -> Option<TaskState> {
        if subtasks
            .iter()
            .any(|s| matches!(s.state, SubtaskState::Running | SubtaskState::Canceling))
        {
            return None;
        }

        if subtasks.iter().any(|s| s.is_unretryable_failure(operation)) {
            return Some(TaskState::Failed);
        }

        let complete = match operation {
            TaskOperation::Execute => subtasks.iter().all(|s| s.state == SubtaskState::Successful),
            TaskOperation::Rollback => subtasks.iter().all(|s| s.state == SubtaskState::Pending),
        };
        complete.then_some(TaskState::Successful)
    }

    async fn notify_hooks(&self, overview: &TaskInstanceOverview) {
        for hook in &self.hooks {
            if let Err(e) = hook.accept(overview).await {
                warn!("任务 {} 的结束通知失败: {}", overview.id, e);
            }
        }
    }
}

#[async_trait]
impl Sweeper for TaskAggregator {
    fn name(&self) -> &'static str {
        "task_aggregator"
    }

    async fn sweep(&self) -> TaskflowResult<usize> {
        self.aggregate_running_tasks().await
    }
}
