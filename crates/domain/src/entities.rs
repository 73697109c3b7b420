use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::context::TaskContext;

/// 为持久化用的枚举生成 `as_str` / `Display` / `FromStr`
macro_rules! persisted_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!("Invalid {}: {s}", stringify!($name))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScheduleType {
    #[serde(rename = "ONCE")]
    Once,
    #[serde(rename = "CRON")]
    Cron,
}

persisted_enum!(ScheduleType { Once => "ONCE", Cron => "CRON" });

/// 任务实例的遍历方向
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskOperation {
    #[serde(rename = "EXECUTE")]
    Execute,
    #[serde(rename = "ROLLBACK")]
    Rollback,
}

persisted_enum!(TaskOperation { Execute => "EXECUTE", Rollback => "ROLLBACK" });

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskState {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "SUCCESSFUL")]
    Successful,
}

persisted_enum!(TaskState {
    Running => "RUNNING",
    Failed => "FAILED",
    Successful => "SUCCESSFUL",
});

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Failed | TaskState::Successful)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskType {
    #[serde(rename = "MANUAL")]
    Manual,
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "SYS_SCHEDULED")]
    SysScheduled,
}

persisted_enum!(TaskType {
    Manual => "MANUAL",
    Scheduled => "SCHEDULED",
    SysScheduled => "SYS_SCHEDULED",
});

/// 子任务状态
///
/// ```text
/// PENDING → READY → RUNNING → SUCCESSFUL
///                      ↓
///                    FAILED ──(重试)──→ READY
/// RUNNING → CANCELING → RUNNING(CANCEL) → FAILED
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubtaskState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCESSFUL")]
    Successful,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELING")]
    Canceling,
}

persisted_enum!(SubtaskState {
    Pending => "PENDING",
    Ready => "READY",
    Running => "RUNNING",
    Successful => "SUCCESSFUL",
    Failed => "FAILED",
    Canceling => "CANCELING",
});

impl SubtaskState {
    /// 占用并发名额的状态，CANCELING 的子任务仍在执行
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SubtaskState::Ready | SubtaskState::Running | SubtaskState::Canceling
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SubtaskOperation {
    #[serde(rename = "EXECUTE")]
    Execute,
    #[serde(rename = "RETRY")]
    Retry,
    #[serde(rename = "CANCEL")]
    Cancel,
    #[serde(rename = "ROLLBACK")]
    Rollback,
}

persisted_enum!(SubtaskOperation {
    Execute => "EXECUTE",
    Retry => "RETRY",
    Cancel => "CANCEL",
    Rollback => "ROLLBACK",
});

/// 周期任务定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: i64,
    pub name: String,
    pub template_name: String,
    pub schedule_type: ScheduleType,
    /// ONCE 为 RFC3339 时间点，CRON 为 cron 表达式
    pub schedule_rule: String,
    pub schedule_start_date: Option<NaiveDate>,
    pub schedule_end_date: Option<NaiveDate>,
    pub enabled: bool,
    pub last_run_time: Option<DateTime<Utc>>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub creator: String,
    pub create_time: DateTime<Utc>,
}

impl TaskDefinition {
    pub fn new(
        name: impl Into<String>,
        template_name: impl Into<String>,
        schedule_type: ScheduleType,
        schedule_rule: impl Into<String>,
    ) -> Self {
        Self {
            id: 0, // 将由存储层生成
            name: name.into(),
            template_name: template_name.into(),
            schedule_type,
            schedule_rule: schedule_rule.into(),
            schedule_start_date: None,
            schedule_end_date: None,
            enabled: true,
            last_run_time: None,
            next_run_time: None,
            creator: "system".to_string(),
            create_time: Utc::now(),
        }
    }

    /// 按天判断是否处于生效窗口内，窗口两端均包含
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if let Some(start) = self.schedule_start_date {
            if today < start {
                return false;
            }
        }
        if let Some(end) = self.schedule_end_date {
            if today > end {
                return false;
            }
        }
        true
    }
}

/// 一次物化的任务运行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: i64,
    pub name: String,
    pub definition_id: Option<i64>,
    pub operation: TaskOperation,
    pub state: TaskState,
    pub task_type: TaskType,
    pub creator: String,
    pub trace_id: String,
    pub tenant_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// 同时处于 READY/RUNNING 的子任务上限，非正数表示不限制
    pub concurrency: i32,
    pub executor: String,
    pub context: TaskContext,
    pub prohibit_rollback: bool,
    pub version: i64,
}

impl TaskInstance {
    pub fn new(name: impl Into<String>, task_type: TaskType, executor: impl Into<String>) -> Self {
        Self {
            id: 0, // 将由存储层生成
            name: name.into(),
            definition_id: None,
            operation: TaskOperation::Execute,
            state: TaskState::Running,
            task_type,
            creator: "system".to_string(),
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
            tenant_id: None,
            start_time: Utc::now(),
            end_time: None,
            concurrency: -1,
            executor: executor.into(),
            context: TaskContext::new(),
            prohibit_rollback: false,
            version: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// DAG 中的一个节点
///
/// 上下游关系只以 id 集合保存，需要时通过存储层解析。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskInstance {
    pub id: i64,
    pub task_id: i64,
    pub name: String,
    /// 已注册的子任务动作名称
    pub action: String,
    pub state: SubtaskState,
    pub operation: SubtaskOperation,
    /// 失败后允许的重试次数
    pub retry_count: i32,
    /// 已进行的执行次数
    pub run_time: i32,
    pub timeout_seconds: i64,
    /// 扇出并行序号，-1 表示不属于扇出
    pub parallel_idx: i32,
    pub executor: Option<String>,
    pub context: TaskContext,
    pub upstreams: Vec<i64>,
    pub downstreams: Vec<i64>,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub latest_execution_start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub version: i64,
}

impl SubtaskInstance {
    pub fn new(task_id: i64, name: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: 0, // 将由存储层生成
            task_id,
            name: name.into(),
            action: action.into(),
            state: SubtaskState::Pending,
            operation: SubtaskOperation::Execute,
            retry_count: 0,
            run_time: 0,
            timeout_seconds: 300,
            parallel_idx: -1,
            executor: None,
            context: TaskContext::new(),
            upstreams: Vec::new(),
            downstreams: Vec::new(),
            create_time: Utc::now(),
            start_time: None,
            latest_execution_start_time: None,
            end_time: None,
            version: 0,
        }
    }

    /// 重试预算是否仍有剩余
    pub fn has_retry_budget(&self) -> bool {
        self.run_time <= self.retry_count
    }

    /// 失败且不会再被重试处理器复活
    ///
    /// 执行方向：被取消，或执行次数已超出重试预算；回滚方向：回滚本身失败。
    pub fn is_unretryable_failure(&self, direction: TaskOperation) -> bool {
        if self.state != SubtaskState::Failed {
            return false;
        }
        match direction {
            TaskOperation::Execute => match self.operation {
                SubtaskOperation::Cancel => true,
                SubtaskOperation::Rollback => false,
                SubtaskOperation::Execute | SubtaskOperation::Retry => !self.has_retry_budget(),
            },
            TaskOperation::Rollback => self.operation == SubtaskOperation::Rollback,
        }
    }

    /// 本次执行开始时间，缺失时退回首次开始时间
    pub fn execution_started_at(&self) -> Option<DateTime<Utc>> {
        self.latest_execution_start_time.or(self.start_time)
    }

    /// 是否已超过超时时间加上余量
    pub fn is_timed_out(&self, now: DateTime<Utc>, slack_seconds: i64) -> bool {
        match self.execution_started_at() {
            Some(started) => now - started > Duration::seconds(self.timeout_seconds + slack_seconds),
            None => false,
        }
    }

    pub fn entity_description(&self) -> String {
        format!("子任务 {}({}) of 任务 {}", self.name, self.id, self.task_id)
    }
}

/// 子任务日志片段，只追加不修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskLogEntry {
    pub id: i64,
    pub subtask_id: i64,
    /// 写入时子任务的执行次数
    pub run_time: i32,
    pub content: String,
    pub create_time: DateTime<Utc>,
}

/// 任务结束时交给通知钩子的概览
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstanceOverview {
    pub id: i64,
    pub name: String,
    pub operation: TaskOperation,
    pub state: TaskState,
    pub task_type: TaskType,
    pub creator: String,
    pub trace_id: String,
    pub tenant_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_subtasks: usize,
    pub successful_subtasks: usize,
    pub failed_subtasks: usize,
}

impl TaskInstanceOverview {
    pub fn from_task(task: &TaskInstance, subtasks: &[SubtaskInstance]) -> Self {
        Self {
            id: task.id,
            name: task.name.clone(),
            operation: task.operation,
            state: task.state,
            task_type: task.task_type,
            creator: task.creator.clone(),
            trace_id: task.trace_id.clone(),
            tenant_id: task.tenant_id,
            start_time: task.start_time,
            end_time: task.end_time,
            total_subtasks: subtasks.len(),
            successful_subtasks: subtasks
                .iter()
                .filter(|s| s.state == SubtaskState::Successful)
                .count(),
            failed_subtasks: subtasks
                .iter()
                .filter(|s| s.state == SubtaskState::Failed)
                .count(),
        }
    }
}

/// 任务实例查询条件
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
    pub task_type: Option<TaskType>,
    pub name_pattern: Option<String>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_enum_roundtrip() {
        assert_eq!(SubtaskState::Canceling.as_str(), "CANCELING");
        assert_eq!("SYS_SCHEDULED".parse::<TaskType>().unwrap(), TaskType::SysScheduled);
        assert!("DONE".parse::<TaskState>().is_err());
        assert_eq!(
            serde_json::to_string(&SubtaskOperation::Retry).unwrap(),
            "\"RETRY\""
        );
    }

    #[test]
    fn test_unretryable_failure_rules() {
        let mut subtask = SubtaskInstance::new(1, "A", "noop");
        subtask.state = SubtaskState::Failed;
        subtask.retry_count = 1;
        subtask.run_time = 1;
        assert!(!subtask.is_unretryable_failure(TaskOperation::Execute));

        subtask.run_time = 2;
        assert!(subtask.is_unretryable_failure(TaskOperation::Execute));
        // 执行阶段的失败不影响回滚方向
        assert!(!subtask.is_unretryable_failure(TaskOperation::Rollback));

        subtask.run_time = 0;
        subtask.operation = SubtaskOperation::Cancel;
        assert!(subtask.is_unretryable_failure(TaskOperation::Execute));

        subtask.operation = SubtaskOperation::Rollback;
        assert!(subtask.is_unretryable_failure(TaskOperation::Rollback));
    }

    #[test]
    fn test_timeout_uses_latest_execution_start() {
        let now = Utc::now();
        let mut subtask = SubtaskInstance::new(1, "A", "noop");
        subtask.timeout_seconds = 5;
        assert!(!subtask.is_timed_out(now, 0));

        subtask.start_time = Some(now - Duration::seconds(100));
        assert!(subtask.is_timed_out(now, 60));

        subtask.latest_execution_start_time = Some(now - Duration::seconds(10));
        assert!(subtask.is_timed_out(now, 0));
        assert!(!subtask.is_timed_out(now, 60));
    }

    #[test]
    fn test_definition_window_is_inclusive_by_day() {
        let mut def = TaskDefinition::new("d", "t", ScheduleType::Cron, "0 * * * * *");
        let now = Utc::now();
        let today = now.date_naive();
        def.schedule_start_date = Some(today);
        def.schedule_end_date = Some(today);
        assert!(def.is_within_window(now));

        def.schedule_start_date = today.succ_opt();
        def.schedule_end_date = None;
        assert!(!def.is_within_window(now));
    }
}
