use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument};

use taskflow_core::{Sweeper, TaskflowResult};
use taskflow_domain::entities::{SubtaskOperation, SubtaskState};
use taskflow_domain::repositories::{CasOutcome, TaskStore};
use taskflow_infrastructure::MetricsCollector;

use crate::running_registry::RunningRegistry;

/// 子任务取消处理器
///
/// 扫描 CANCELING 子任务：在本节点执行的先中断执行 future，然后把子任务改为
/// RUNNING + CANCEL，由巡检最终标记失败。其他节点上的执行无法从这里中断。
pub struct SubtaskCancellationHandler {
    store: Arc<dyn TaskStore>,
    registry: RunningRegistry,
    host_id: String,
    lookback: Duration,
    metrics: Arc<MetricsCollector>,
}

impl SubtaskCancellationHandler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: RunningRegistry,
        host_id: impl Into<String>,
        lookback_hours: i64,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            registry,
            host_id: host_id.into(),
            lookback: Duration::hours(lookback_hours),
            metrics,
        }
    }

    pub async fn scan_canceling_subtasks(&self, now: DateTime<Utc>) -> TaskflowResult<usize> {
        let ids = self
            .store
            .find_subtask_ids_by_state(SubtaskState::Canceling, Some(now - self.lookback))
            .await?;

        let mut handled = 0;
        for id in ids {
            match self.handle(id).await {
                Ok(true) => handled += 1,
                Ok(false) => {}
                Err(e) => error!("处理子任务 {} 的取消请求失败: {}", id, e),
            }
        }
        Ok(handled)
    }

    #[instrument(skip(self))]
    async fn handle(&self, subtask_id: i64) -> TaskflowResult<bool> {
        let Some(mut subtask) = self.store.get_subtask(subtask_id).await? else {
            return Ok(false);
        };
        if subtask.state != SubtaskState::Canceling {
            return Ok(false);
        }

        if subtask.executor.as_deref() == Some(self.host_id.as_str()) {
            if self.registry.interrupt(subtask.id).await {
                info!("{} 的本地执行已中断", subtask.entity_description());
            }
        } else {
            debug!(
                "{} 由 {:?} 执行，跳过中断",
                subtask.entity_description(),
                subtask.executor
            );
        }

        subtask.operation = SubtaskOperation::Cancel;
        subtask.state = SubtaskState::Running;
        match self
            .store
            .transition_subtask(&mut subtask, SubtaskState::Canceling)
            .await?
        {
            CasOutcome::Applied => Ok(true),
            CasOutcome::Conflict => {
                debug!("{} 的取消请求已被其他执行者处理", subtask.entity_description());
                self.metrics.record_cas_conflict();
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl Sweeper for SubtaskCancellationHandler {
    fn name(&self) -> &'static str {
        "subtask_cancellation"
    }

    async fn sweep(&self) -> TaskflowResult<usize> {
        self.scan_canceling_subtasks(Utc::now()).await
    }
}
