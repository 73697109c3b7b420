//! Test data builders for creating test entities

use chrono::{DateTime, Utc};
use taskflow_domain::entities::{
    ScheduleType, SubtaskInstance, SubtaskOperation, SubtaskState, TaskDefinition, TaskInstance,
    TaskOperation, TaskState, TaskType,
};
use taskflow_domain::TaskContext;

/// Builder for creating test SubtaskInstance entities
///
/// `id` 默认是在图中的临时编号，配合 `save_task_graph` 使用。
pub struct SubtaskBuilder {
    subtask: SubtaskInstance,
}

impl SubtaskBuilder {
    pub fn new(id: i64, name: &str) -> Self {
        let mut subtask = SubtaskInstance::new(0, name, "noop");
        subtask.id = id;
        Self { subtask }
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.subtask.action = action.to_string();
        self
    }

    pub fn with_state(mut self, state: SubtaskState) -> Self {
        self.subtask.state = state;
        self
    }

    pub fn with_operation(mut self, operation: SubtaskOperation) -> Self {
        self.subtask.operation = operation;
        self
    }

    pub fn with_upstreams(mut self, upstreams: &[i64]) -> Self {
        self.subtask.upstreams = upstreams.to_vec();
        self
    }

    pub fn with_downstreams(mut self, downstreams: &[i64]) -> Self {
        self.subtask.downstreams = downstreams.to_vec();
        self
    }

    pub fn with_retry(mut self, retry_count: i32, run_time: i32) -> Self {
        self.subtask.retry_count = retry_count;
        self.subtask.run_time = run_time;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: i64) -> Self {
        self.subtask.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_executor(mut self, executor: &str) -> Self {
        self.subtask.executor = Some(executor.to_string());
        self
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.subtask.context = context;
        self
    }

    pub fn started_at(mut self, started: DateTime<Utc>) -> Self {
        self.subtask.start_time = Some(started);
        self.subtask.latest_execution_start_time = Some(started);
        self
    }

    pub fn running(self, executor: &str) -> Self {
        self.with_state(SubtaskState::Running)
            .with_executor(executor)
            .started_at(Utc::now())
    }

    pub fn build(self) -> SubtaskInstance {
        self.subtask
    }
}

/// 按 `upstream -> downstream` 连线补全两端的上下游集合
pub fn wire(subtasks: &mut [SubtaskInstance], edges: &[(i64, i64)]) {
    for (upstream, downstream) in edges {
        for subtask in subtasks.iter_mut() {
            if subtask.id == *upstream && !subtask.downstreams.contains(downstream) {
                subtask.downstreams.push(*downstream);
            }
            if subtask.id == *downstream && !subtask.upstreams.contains(upstream) {
                subtask.upstreams.push(*upstream);
            }
        }
    }
}

/// Builder for creating test TaskInstance entities
pub struct TaskBuilder {
    task: TaskInstance,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: TaskInstance::new("test_task", TaskType::Manual, "test-host"),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task.task_type = task_type;
        self
    }

    pub fn with_concurrency(mut self, concurrency: i32) -> Self {
        self.task.concurrency = concurrency;
        self
    }

    pub fn with_operation(mut self, operation: TaskOperation) -> Self {
        self.task.operation = operation;
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.task.state = state;
        self
    }

    pub fn prohibit_rollback(mut self) -> Self {
        self.task.prohibit_rollback = true;
        self
    }

    pub fn build(self) -> TaskInstance {
        self.task
    }
}

/// Builder for creating test TaskDefinition entities
pub struct DefinitionBuilder {
    definition: TaskDefinition,
}

impl DefinitionBuilder {
    pub fn cron(name: &str, template: &str, expr: &str) -> Self {
        Self {
            definition: TaskDefinition::new(name, template, ScheduleType::Cron, expr),
        }
    }

    pub fn once(name: &str, template: &str, at: &str) -> Self {
        Self {
            definition: TaskDefinition::new(name, template, ScheduleType::Once, at),
        }
    }

    pub fn with_next_run(mut self, next: DateTime<Utc>) -> Self {
        self.definition.next_run_time = Some(next);
        self
    }

    pub fn with_last_run(mut self, last: DateTime<Utc>) -> Self {
        self.definition.last_run_time = Some(last);
        self
    }

    pub fn with_window(
        mut self,
        start: Option<chrono::NaiveDate>,
        end: Option<chrono::NaiveDate>,
    ) -> Self {
        self.definition.schedule_start_date = start;
        self.definition.schedule_end_date = end;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.definition.enabled = false;
        self
    }

    pub fn build(self) -> TaskDefinition {
        self.definition
    }
}
