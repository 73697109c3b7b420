use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, instrument};

use taskflow_core::{Sweeper, TaskflowResult};
use taskflow_domain::entities::{SubtaskOperation, SubtaskState, TaskOperation};
use taskflow_domain::repositories::{CasOutcome, TaskStore};
use taskflow_infrastructure::{MetricsCollector, StructuredLogger};

/// 子任务重试服务
///
/// 扫描最近创建的 FAILED 子任务，重试预算未用完时增加执行次数并重新置为 READY。
/// 被取消的子任务和回滚失败的子任务不会被重试。
pub struct SubtaskRetryService {
    store: Arc<dyn TaskStore>,
    lookback: Duration,
    metrics: Arc<MetricsCollector>,
}

impl SubtaskRetryService {
    pub fn new(store: Arc<dyn TaskStore>, lookback_hours: i64, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            store,
            lookback: Duration::hours(lookback_hours),
            metrics,
        }
    }

    /// 扫描一轮，返回被重新置为 READY 的子任务数
    pub async fn scan_failed_subtasks(&self, now: DateTime<Utc>) -> TaskflowResult<usize> {
        let ids = self
            .store
            .find_subtask_ids_by_state(SubtaskState::Failed, Some(now - self.lookback))
            .await?;

        let mut retried = 0;
        for id in ids {
            match self.retry_subtask(id).await {
                Ok(true) => retried += 1,
                Ok(false) => {}
                Err(e) => error!("重试子任务 {} 失败: {}", id, e),
            }
        }
        Ok(retried)
    }

    #[instrument(skip(self))]
    pub async fn retry_subtask(&self, subtask_id: i64) -> TaskflowResult<bool> {
        let Some(mut subtask) = self.store.get_subtask(subtask_id).await? else {
            return Ok(false);
        };
        if subtask.state != SubtaskState::Failed {
            return Ok(false);
        }
        if matches!(
            subtask.operation,
            SubtaskOperation::Cancel | SubtaskOperation::Rollback
        ) {
            return Ok(false);
        }
        if !subtask.has_retry_budget() {
            debug!(
                "{} 重试次数已用完 ({}/{})",
                subtask.entity_description(),
                subtask.run_time,
                subtask.retry_count
            );
            return Ok(false);
        }

        // 只在正向执行中的任务里复活子任务
        match self.store.get_task(subtask.task_id).await? {
            Some(task) if task.is_running() && task.operation == TaskOperation::Execute => {}
            _ => return Ok(false),
        }

        subtask.run_time += 1;
        subtask.operation = SubtaskOperation::Retry;
        subtask.state = SubtaskState::Ready;
        match self
            .store
            .transition_subtask(&mut subtask, SubtaskState::Failed)
            .await?
        {
            CasOutcome::Applied => {
                StructuredLogger::log_subtask_retried(
                    subtask.id,
                    subtask.task_id,
                    subtask.run_time,
                    subtask.retry_count,
                );
                self.metrics.record_subtask_retry();
                Ok(true)
            }
            CasOutcome::Conflict => {
                debug!("{} 已被其他执行者推进", subtask.entity_description());
                self.metrics.record_cas_conflict();
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl Sweeper for SubtaskRetryService {
    fn name(&self) -> &'static str {
        "subtask_retry"
    }

    async fn sweep(&self) -> TaskflowResult<usize> {
        self.scan_failed_subtasks(Utc::now()).await
    }
}
