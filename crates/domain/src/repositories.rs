//! 存储层接口定义
//!
//! 持久化的任务图是引擎唯一的事实来源，所有工作组件在两轮扫描之间不保留状态。
//! 状态转换一律使用乐观锁：调用方持有实体快照（含 `version`），存储层只在当前
//! 版本与状态都与快照一致时才写入，并返回 [`CasOutcome`]。并发写入的失败方
//! 得到 `Conflict`，这是正常的竞争结果而不是错误。
//!
//! - `TaskDefinitionRepository` - 周期任务定义
//! - `TaskInstanceRepository` - 任务实例与任务图的原子创建
//! - `SubtaskInstanceRepository` - 子任务状态转换与批量更新
//! - `SubtaskLogRepository` - 子任务日志追加
//! - `TaskStore` - 以上全部

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskflow_core::TaskflowResult;

use crate::entities::{
    ScheduleType, SubtaskInstance, SubtaskLogEntry, SubtaskState, TaskDefinition, TaskFilter,
    TaskInstance, TaskState,
};

/// 乐观锁状态转换的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum CasOutcome {
    Applied,
    /// 实体已被其他写入者推进
    Conflict,
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CasOutcome::Conflict)
    }
}

#[async_trait]
pub trait TaskDefinitionRepository: Send + Sync {
    /// 创建任务定义，返回带有生成ID的实例
    async fn create_definition(&self, definition: &TaskDefinition)
        -> TaskflowResult<TaskDefinition>;

    async fn get_definition(&self, id: i64) -> TaskflowResult<Option<TaskDefinition>>;

    async fn find_enabled_definitions(
        &self,
        schedule_type: ScheduleType,
    ) -> TaskflowResult<Vec<TaskDefinition>>;

    /// 覆盖写入定义（上次/下次运行时间、启用标记）
    async fn update_definition(&self, definition: &TaskDefinition) -> TaskflowResult<()>;
}

#[async_trait]
pub trait TaskInstanceRepository: Send + Sync {
    /// 原子保存任务及其全部子任务
    ///
    /// `subtasks` 中的 `id` 以及 `upstreams`/`downstreams` 是临时编号，存储层为每个
    /// 子任务分配正式ID并重映射所有引用。返回持久化后的任务和子任务（顺序与输入一致）。
    async fn save_task_graph(
        &self,
        task: &TaskInstance,
        subtasks: &[SubtaskInstance],
    ) -> TaskflowResult<(TaskInstance, Vec<SubtaskInstance>)>;

    async fn get_task(&self, id: i64) -> TaskflowResult<Option<TaskInstance>>;

    async fn list_tasks(&self, filter: &TaskFilter) -> TaskflowResult<Vec<TaskInstance>>;

    async fn find_running_task_ids(&self) -> TaskflowResult<Vec<i64>>;

    /// 当存储中的任务版本与 `task.version` 一致且状态为 `expected` 时写入 `task`
    ///
    /// 成功时 `task.version` 被更新为新版本。
    async fn transition_task(
        &self,
        task: &mut TaskInstance,
        expected: TaskState,
    ) -> TaskflowResult<CasOutcome>;
}

#[async_trait]
pub trait SubtaskInstanceRepository: Send + Sync {
    async fn get_subtask(&self, id: i64) -> TaskflowResult<Option<SubtaskInstance>>;

    /// 任务下的全部子任务，按ID升序
    async fn find_subtasks_by_task(&self, task_id: i64) -> TaskflowResult<Vec<SubtaskInstance>>;

    /// 指定状态的子任务ID，可限定创建时间下界，按ID升序
    async fn find_subtask_ids_by_state(
        &self,
        state: SubtaskState,
        since: Option<DateTime<Utc>>,
    ) -> TaskflowResult<Vec<i64>>;

    /// 批量把仍处于 `expected` 之一的子任务置为 `state`，返回实际更新的数量
    async fn update_subtask_states(
        &self,
        ids: &[i64],
        expected: &[SubtaskState],
        state: SubtaskState,
    ) -> TaskflowResult<u64>;

    /// 当存储中的子任务版本与 `subtask.version` 一致且状态为 `expected` 时写入 `subtask`
    ///
    /// 成功时 `subtask.version` 被更新为新版本。
    async fn transition_subtask(
        &self,
        subtask: &mut SubtaskInstance,
        expected: SubtaskState,
    ) -> TaskflowResult<CasOutcome>;
}

#[async_trait]
pub trait SubtaskLogRepository: Send + Sync {
    async fn append_log(&self, subtask_id: i64, run_time: i32, content: &str)
        -> TaskflowResult<()>;

    /// 按写入顺序返回日志，`run_time` 为 `None` 时返回全部执行次数的日志
    async fn find_logs(
        &self,
        subtask_id: i64,
        run_time: Option<i32>,
    ) -> TaskflowResult<Vec<SubtaskLogEntry>>;
}

/// 引擎使用的完整存储协作者
pub trait TaskStore:
    TaskDefinitionRepository + TaskInstanceRepository + SubtaskInstanceRepository + SubtaskLogRepository
{
}

impl<T> TaskStore for T where
    T: TaskDefinitionRepository
        + TaskInstanceRepository
        + SubtaskInstanceRepository
        + SubtaskLogRepository
{
}
