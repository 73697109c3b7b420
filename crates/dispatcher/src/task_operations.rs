//! 面向运维的任务操作
//!
//! 这些操作直接调用与后台组件相同的状态转换原语，竞争失败时返回
//! `InvalidOperation`，由调用方决定是否重试。

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use taskflow_core::{TaskflowError, TaskflowResult};
use taskflow_domain::entities::{
    SubtaskInstance, SubtaskOperation, SubtaskState, TaskFilter, TaskInstance, TaskOperation,
    TaskState, TaskType,
};
use taskflow_domain::registry::TemplateRegistry;
use taskflow_domain::repositories::{CasOutcome, TaskStore};
use taskflow_domain::template::Argument;

use crate::task_factory::{NewTask, TaskFactory};

/// 任务详情：任务及其全部子任务
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    pub task: TaskInstance,
    pub subtasks: Vec<SubtaskInstance>,
}

pub struct TaskOperationService {
    store: Arc<dyn TaskStore>,
    templates: Arc<TemplateRegistry>,
    factory: Arc<TaskFactory>,
}

impl TaskOperationService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        templates: Arc<TemplateRegistry>,
        factory: Arc<TaskFactory>,
    ) -> Self {
        Self {
            store,
            templates,
            factory,
        }
    }

    /// 手动提交任务，未指定参数时使用模板自带的参数
    pub async fn submit_task(
        &self,
        template_name: &str,
        argument: Option<Argument>,
        creator: &str,
    ) -> TaskflowResult<TaskInstance> {
        let schedule = self.templates.require(template_name)?;
        let argument = argument.unwrap_or_else(|| schedule.argument());

        let (task, _) = self
            .factory
            .create_task(NewTask {
                name: format!("{}-{}", template_name, Utc::now().format("%Y%m%d%H%M%S")),
                template: schedule.template(),
                argument,
                task_type: TaskType::Manual,
                definition_id: None,
                creator: creator.to_string(),
            })
            .await?;
        info!("{} 手动提交任务 {}({})", creator, task.name, task.id);
        Ok(task)
    }

    /// 重试失败的任务：任务回到 RUNNING/EXECUTE，失败的子任务以新的执行次数重新排队
    pub async fn retry_task(&self, task_id: i64) -> TaskflowResult<TaskInstance> {
        let mut task = self.require_task(task_id).await?;
        if task.state != TaskState::Failed {
            return Err(TaskflowError::invalid_operation(format!(
                "只能重试失败的任务，当前状态: {}",
                task.state
            )));
        }

        task.state = TaskState::Running;
        task.operation = TaskOperation::Execute;
        task.end_time = None;
        Self::expect_applied(
            self.store.transition_task(&mut task, TaskState::Failed).await?,
            "任务状态已变化",
        )?;

        let mut rearmed = 0;
        for mut subtask in self.store.find_subtasks_by_task(task_id).await? {
            if subtask.state != SubtaskState::Failed {
                continue;
            }
            subtask.run_time += 1;
            subtask.operation = SubtaskOperation::Retry;
            subtask.state = SubtaskState::Pending;
            subtask.end_time = None;
            // 并发修改过的子任务保持原状，由后台组件继续处理
            match self
                .store
                .transition_subtask(&mut subtask, SubtaskState::Failed)
                .await?
            {
                CasOutcome::Applied => rearmed += 1,
                CasOutcome::Conflict => {
                    debug!("子任务 {} 已被其他执行者修改，跳过重新执行", subtask.id);
                }
            }
        }

        info!("任务 {} 已重新开始执行，{} 个失败子任务重新排队", task_id, rearmed);
        Ok(task)
    }

    /// 回滚已结束的任务
    pub async fn rollback_task(&self, task_id: i64) -> TaskflowResult<TaskInstance> {
        let mut task = self.require_task(task_id).await?;
        if !task.is_finished() {
            return Err(TaskflowError::invalid_operation("只能回滚已结束的任务"));
        }
        if task.prohibit_rollback {
            return Err(TaskflowError::invalid_operation(format!(
                "任务 {task_id} 禁止回滚"
            )));
        }

        let previous = task.state;
        task.state = TaskState::Running;
        task.operation = TaskOperation::Rollback;
        task.end_time = None;
        Self::expect_applied(
            self.store.transition_task(&mut task, previous).await?,
            "任务状态已变化",
        )?;

        // 尚未执行的 READY 子任务直接退回 PENDING
        let ready: Vec<i64> = self
            .store
            .find_subtasks_by_task(task_id)
            .await?
            .into_iter()
            .filter(|s| s.state == SubtaskState::Ready)
            .map(|s| s.id)
            .collect();
        self.store
            .update_subtask_states(&ready, &[SubtaskState::Ready], SubtaskState::Pending)
            .await?;

        info!("任务 {} 开始回滚", task_id);
        Ok(task)
    }

    /// 立即重试一个失败的子任务，任务已失败时重新打开任务
    pub async fn retry_subtask(&self, subtask_id: i64) -> TaskflowResult<SubtaskInstance> {
        let mut subtask = self.require_subtask(subtask_id).await?;
        if subtask.state != SubtaskState::Failed {
            return Err(TaskflowError::invalid_operation(format!(
                "只能重试失败的子任务，当前状态: {}",
                subtask.state
            )));
        }
        self.reopen_task(subtask.task_id).await?;

        subtask.run_time += 1;
        subtask.operation = SubtaskOperation::Retry;
        subtask.state = SubtaskState::Ready;
        subtask.end_time = None;
        Self::expect_applied(
            self.store
                .transition_subtask(&mut subtask, SubtaskState::Failed)
                .await?,
            "子任务状态已变化",
        )?;
        Ok(subtask)
    }

    /// 跳过子任务：FAILED/PENDING 直接视为成功
    pub async fn skip_subtask(&self, subtask_id: i64) -> TaskflowResult<SubtaskInstance> {
        let mut subtask = self.require_subtask(subtask_id).await?;
        let previous = subtask.state;
        if !matches!(previous, SubtaskState::Failed | SubtaskState::Pending) {
            return Err(TaskflowError::invalid_operation(format!(
                "只能跳过失败或等待中的子任务，当前状态: {previous}"
            )));
        }
        self.reopen_task(subtask.task_id).await?;

        subtask.state = SubtaskState::Successful;
        subtask.end_time = Some(Utc::now());
        Self::expect_applied(
            self.store.transition_subtask(&mut subtask, previous).await?,
            "子任务状态已变化",
        )?;
        info!("{} 已被跳过", subtask.entity_description());
        Ok(subtask)
    }

    /// 取消子任务
    ///
    /// 未开始的子任务直接失败；运行中的子任务进入 CANCELING，由取消处理器中断执行。
    pub async fn cancel_subtask(&self, subtask_id: i64) -> TaskflowResult<SubtaskInstance> {
        let mut subtask = self.require_subtask(subtask_id).await?;
        let previous = subtask.state;
        match previous {
            SubtaskState::Ready | SubtaskState::Pending => {
                subtask.state = SubtaskState::Failed;
                subtask.operation = SubtaskOperation::Cancel;
                subtask.end_time = Some(Utc::now());
            }
            SubtaskState::Running => {
                subtask.state = SubtaskState::Canceling;
            }
            _ => {
                return Err(TaskflowError::invalid_operation(format!(
                    "无法取消处于 {previous} 状态的子任务"
                )))
            }
        }
        Self::expect_applied(
            self.store.transition_subtask(&mut subtask, previous).await?,
            "子任务状态已变化",
        )?;
        info!("{} 已请求取消", subtask.entity_description());
        Ok(subtask)
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> TaskflowResult<Vec<TaskInstance>> {
        self.store.list_tasks(filter).await
    }

    pub async fn get_task_detail(&self, task_id: i64) -> TaskflowResult<TaskDetail> {
        let task = self.require_task(task_id).await?;
        let subtasks = self.store.find_subtasks_by_task(task_id).await?;
        Ok(TaskDetail { task, subtasks })
    }

    /// 子任务级操作需要任务处于正向执行；已失败的任务被重新打开
    async fn reopen_task(&self, task_id: i64) -> TaskflowResult<()> {
        let mut task = self.require_task(task_id).await?;
        if task.operation != TaskOperation::Execute {
            return Err(TaskflowError::invalid_operation("回滚中的任务不支持子任务操作"));
        }
        match task.state {
            TaskState::Running => Ok(()),
            TaskState::Failed => {
                task.state = TaskState::Running;
                task.end_time = None;
                Self::expect_applied(
                    self.store.transition_task(&mut task, TaskState::Failed).await?,
                    "任务状态已变化",
                )
            }
            TaskState::Successful => Err(TaskflowError::invalid_operation("任务已成功结束")),
        }
    }

    async fn require_task(&self, task_id: i64) -> TaskflowResult<TaskInstance> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or(TaskflowError::TaskNotFound { id: task_id })
    }

    async fn require_subtask(&self, subtask_id: i64) -> TaskflowResult<SubtaskInstance> {
        self.store
            .get_subtask(subtask_id)
            .await?
            .ok_or(TaskflowError::SubtaskNotFound { id: subtask_id })
    }

    fn expect_applied(outcome: CasOutcome, message: &str) -> TaskflowResult<()> {
        match outcome {
            CasOutcome::Applied => Ok(()),
            CasOutcome::Conflict => Err(TaskflowError::invalid_operation(message)),
        }
    }
}
