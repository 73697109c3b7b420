use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, instrument};

use taskflow_core::{Sweeper, TaskflowResult};
use taskflow_domain::entities::{SubtaskOperation, SubtaskState};
use taskflow_domain::repositories::{CasOutcome, TaskStore};
use taskflow_infrastructure::{MetricsCollector, StructuredLogger};

use crate::running_registry::{log_interruption, RunningRegistry};

/// 巡检结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Cancelled,
    TimedOut,
}

/// 子任务巡检
///
/// 派发器计时器之外的兜底：扫描回溯窗口内的 RUNNING 子任务，
/// 完成取消请求，并在超过超时时间加余量后强制失败。
pub struct SubtaskWatchdog {
    store: Arc<dyn TaskStore>,
    registry: RunningRegistry,
    lookback: Duration,
    slack_seconds: i64,
    metrics: Arc<MetricsCollector>,
}

impl SubtaskWatchdog {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: RunningRegistry,
        lookback_hours: i64,
        slack_seconds: i64,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            registry,
            lookback: Duration::hours(lookback_hours),
            slack_seconds,
            metrics,
        }
    }

    /// 扫描一轮，返回被强制结束的子任务数
    pub async fn scan_running_subtasks(&self, now: DateTime<Utc>) -> TaskflowResult<usize> {
        let ids = self
            .store
            .find_subtask_ids_by_state(SubtaskState::Running, Some(now - self.lookback))
            .await?;

        let mut finalized = 0;
        for id in ids {
            match self.inspect(id, now).await {
                Ok(true) => finalized += 1,
                Ok(false) => {}
                Err(e) => error!("巡检子任务 {} 失败: {}", id, e),
            }
        }
        Ok(finalized)
    }

    #[instrument(skip(self))]
    async fn inspect(&self, subtask_id: i64, now: DateTime<Utc>) -> TaskflowResult<bool> {
        let Some(mut subtask) = self.store.get_subtask(subtask_id).await? else {
            return Ok(false);
        };
        if subtask.state != SubtaskState::Running {
            return Ok(false);
        }

        let verdict = if subtask.operation == SubtaskOperation::Cancel {
            Verdict::Cancelled
        } else if subtask.is_timed_out(now, self.slack_seconds) {
            Verdict::TimedOut
        } else {
            return Ok(false);
        };

        subtask.state = SubtaskState::Failed;
        subtask.end_time = Some(now);
        if self
            .store
            .transition_subtask(&mut subtask, SubtaskState::Running)
            .await?
            == CasOutcome::Conflict
        {
            debug!("{} 已被其他执行者推进", subtask.entity_description());
            self.metrics.record_cas_conflict();
            return Ok(false);
        }

        // 状态已落定，再尽力中断并记录
        let local = self.registry.interrupt(subtask.id).await;
        match verdict {
            Verdict::Cancelled => {
                log_interruption(self.store.clone(), &subtask, "cancelled", local).await;
                StructuredLogger::log_subtask_cancelled(subtask.id, subtask.task_id, local);
                self.metrics.record_subtask_cancellation();
            }
            Verdict::TimedOut => {
                log_interruption(self.store.clone(), &subtask, "timeout", local).await;
                StructuredLogger::log_subtask_timeout(
                    subtask.id,
                    subtask.task_id,
                    subtask.timeout_seconds,
                );
                self.metrics.record_subtask_timeout();
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl Sweeper for SubtaskWatchdog {
    fn name(&self) -> &'static str {
        "subtask_watchdog"
    }

    async fn sweep(&self) -> TaskflowResult<usize> {
        self.scan_running_subtasks(Utc::now()).await
    }
}
