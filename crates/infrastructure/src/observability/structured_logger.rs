//! 结构化日志事件
//!
//! 引擎的关键状态转换都通过这里输出，每条日志带有 `event` 字段，便于按事件检索。

use tracing::{error, info, warn};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_task_graph_created(task_id: i64, task_name: &str, task_type: &str, subtasks: usize) {
        info!(
            event = "task_graph_created",
            task.id = task_id,
            task.name = task_name,
            task.type = task_type,
            task.subtasks = subtasks,
            "任务图已创建"
        );
    }

    pub fn log_subtask_claimed(subtask_id: i64, task_id: i64, action: &str, attempt: i32, executor: &str) {
        info!(
            event = "subtask_claimed",
            subtask.id = subtask_id,
            task.id = task_id,
            subtask.action = action,
            subtask.attempt = attempt,
            executor = executor,
            "子任务开始执行"
        );
    }

    pub fn log_subtask_completed(subtask_id: i64, task_id: i64, operation: &str, duration_ms: u64) {
        info!(
            event = "subtask_completed",
            subtask.id = subtask_id,
            task.id = task_id,
            subtask.operation = operation,
            subtask.duration_ms = duration_ms,
            "子任务执行成功"
        );
    }

    pub fn log_subtask_failed(subtask_id: i64, task_id: i64, attempt: i32, error_message: &str) {
        error!(
            event = "subtask_failed",
            subtask.id = subtask_id,
            task.id = task_id,
            subtask.attempt = attempt,
            subtask.error = error_message,
            "子任务执行失败"
        );
    }

    pub fn log_subtask_timeout(subtask_id: i64, task_id: i64, timeout_seconds: i64) {
        warn!(
            event = "subtask_timeout",
            subtask.id = subtask_id,
            task.id = task_id,
            subtask.timeout_seconds = timeout_seconds,
            "子任务执行超时"
        );
    }

    pub fn log_subtask_retried(subtask_id: i64, task_id: i64, attempt: i32, retry_count: i32) {
        info!(
            event = "subtask_retried",
            subtask.id = subtask_id,
            task.id = task_id,
            subtask.attempt = attempt,
            subtask.retry_count = retry_count,
            "子任务进入重试"
        );
    }

    pub fn log_subtask_cancelled(subtask_id: i64, task_id: i64, local: bool) {
        warn!(
            event = "subtask_cancelled",
            subtask.id = subtask_id,
            task.id = task_id,
            subtask.local = local,
            "子任务已取消"
        );
    }

    pub fn log_task_finished(task_id: i64, task_name: &str, operation: &str, state: &str) {
        if state == "SUCCESSFUL" {
            info!(
                event = "task_finished",
                task.id = task_id,
                task.name = task_name,
                task.operation = operation,
                task.state = state,
                "任务已结束"
            );
        } else {
            error!(
                event = "task_finished",
                task.id = task_id,
                task.name = task_name,
                task.operation = operation,
                task.state = state,
                "任务已结束"
            );
        }
    }

    pub fn log_definition_disabled(definition_id: i64, definition_name: &str, reason: &str) {
        warn!(
            event = "definition_disabled",
            definition.id = definition_id,
            definition.name = definition_name,
            reason = reason,
            "任务定义已被禁用"
        );
    }
}
