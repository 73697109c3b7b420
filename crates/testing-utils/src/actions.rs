//! Controllable subtask actions for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use taskflow_core::{TaskflowError, TaskflowResult};
use taskflow_domain::actions::{SubtaskAction, SubtaskContext};
use taskflow_domain::TaskContext;

/// 共享的执行记录，按完成顺序保存 `"<名称>:<方向>"`
#[derive(Clone, Default)]
pub struct ExecutionJournal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

/// 立即成功，把子任务名写入上下文并记录执行顺序
pub struct RecordingAction {
    name: String,
    journal: ExecutionJournal,
    retries: i32,
}

impl RecordingAction {
    pub fn new(name: &str, journal: ExecutionJournal) -> Self {
        Self {
            name: name.to_string(),
            journal,
            retries: 0,
        }
    }
}

#[async_trait]
impl SubtaskAction for RecordingAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: SubtaskContext) -> TaskflowResult<TaskContext> {
        ctx.logger.log(format!("{} executed", self.name)).await;
        self.journal
            .record(format!("{}#{}:execute", self.name, ctx.subtask_id));
        Ok(ctx
            .context
            .with(format!("done_{}", ctx.subtask_id), ctx.attempt))
    }

    async fn rollback(&self, ctx: SubtaskContext) -> TaskflowResult<TaskContext> {
        self.journal
            .record(format!("{}#{}:rollback", self.name, ctx.subtask_id));
        Ok(ctx.context)
    }

    fn retry_count(&self) -> i32 {
        self.retries
    }
}

/// 总是失败，统计被调用的次数
pub struct FailingAction {
    name: String,
    retries: i32,
    calls: Arc<AtomicUsize>,
}

impl FailingAction {
    pub fn new(name: &str, retries: i32) -> Self {
        Self {
            name: name.to_string(),
            retries,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl SubtaskAction for FailingAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: SubtaskContext) -> TaskflowResult<TaskContext> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ctx.logger.log(format!("attempt {} failing", ctx.attempt)).await;
        Err(TaskflowError::task_execution(format!(
            "{} failed on attempt {}",
            self.name, ctx.attempt
        )))
    }

    async fn rollback(&self, _ctx: SubtaskContext) -> TaskflowResult<TaskContext> {
        Err(TaskflowError::task_execution("rollback failed"))
    }

    fn retry_count(&self) -> i32 {
        self.retries
    }
}

/// 睡眠指定时间后成功，用于超时和取消场景
pub struct SleepAction {
    name: String,
    sleep: Duration,
    timeout_seconds: i64,
    finished: Arc<AtomicUsize>,
}

impl SleepAction {
    pub fn new(name: &str, sleep: Duration, timeout_seconds: i64) -> Self {
        Self {
            name: name.to_string(),
            sleep,
            timeout_seconds,
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 完整睡眠结束的次数，被中断的执行不计入
    pub fn finished(&self) -> Arc<AtomicUsize> {
        self.finished.clone()
    }
}

#[async_trait]
impl SubtaskAction for SleepAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: SubtaskContext) -> TaskflowResult<TaskContext> {
        tokio::time::sleep(self.sleep).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(ctx.context)
    }

    fn timeout_seconds(&self) -> i64 {
        self.timeout_seconds
    }
}

/// 执行时直接 panic，超时设得很长，便于确认失败不是由计时器触发的
pub struct PanickingAction {
    name: String,
}

impl PanickingAction {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl SubtaskAction for PanickingAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: SubtaskContext) -> TaskflowResult<TaskContext> {
        panic!("{} blew up", self.name)
    }

    fn timeout_seconds(&self) -> i64 {
        3600
    }
}
