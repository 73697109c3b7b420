//! 引擎指标
//!
//! 只注册指标句柄，是否导出由宿主进程安装的 recorder 决定。
//! 扫描耗时 `taskflow_sweep_duration_seconds` 由 `taskflow_core::run_sweep_loop` 记录。

use metrics::{counter, histogram, Counter, Histogram};

pub struct MetricsCollector {
    tasks_created_total: Counter,
    tasks_successful_total: Counter,
    tasks_failed_total: Counter,
    subtask_executions_total: Counter,
    subtask_failures_total: Counter,
    subtask_retries_total: Counter,
    subtask_timeouts_total: Counter,
    subtask_cancellations_total: Counter,
    subtask_execution_duration: Histogram,
    cas_conflicts_total: Counter,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_created_total: counter!("taskflow_tasks_created_total"),
            tasks_successful_total: counter!("taskflow_tasks_successful_total"),
            tasks_failed_total: counter!("taskflow_tasks_failed_total"),
            subtask_executions_total: counter!("taskflow_subtask_executions_total"),
            subtask_failures_total: counter!("taskflow_subtask_failures_total"),
            subtask_retries_total: counter!("taskflow_subtask_retries_total"),
            subtask_timeouts_total: counter!("taskflow_subtask_timeouts_total"),
            subtask_cancellations_total: counter!("taskflow_subtask_cancellations_total"),
            subtask_execution_duration: histogram!(
                "taskflow_subtask_execution_duration_seconds"
            ),
            cas_conflicts_total: counter!("taskflow_cas_conflicts_total"),
        }
    }

    pub fn record_task_created(&self) {
        self.tasks_created_total.increment(1);
    }

    pub fn record_task_finished(&self, successful: bool) {
        if successful {
            self.tasks_successful_total.increment(1);
        } else {
            self.tasks_failed_total.increment(1);
        }
    }

    pub fn record_subtask_execution(&self, success: bool, duration_seconds: f64) {
        self.subtask_executions_total.increment(1);
        self.subtask_execution_duration.record(duration_seconds);
        if !success {
            self.subtask_failures_total.increment(1);
        }
    }

    pub fn record_subtask_retry(&self) {
        self.subtask_retries_total.increment(1);
    }

    pub fn record_subtask_timeout(&self) {
        self.subtask_timeouts_total.increment(1);
    }

    pub fn record_subtask_cancellation(&self) {
        self.subtask_cancellations_total.increment(1);
    }

    /// 乐观锁竞争失败
    pub fn record_cas_conflict(&self) {
        self.cas_conflicts_total.increment(1);
    }
}
