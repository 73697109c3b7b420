//! 子任务派发器
//!
//! 认领 READY 子任务并在对应的执行池中运行，同时为每次执行启动超时计时器。
//! 认领通过乐观锁完成，多个节点同时认领同一子任务时只有一个成功，其余静默放弃。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error, instrument, warn};

use taskflow_core::{Sweeper, TaskflowError, TaskflowResult};
use taskflow_domain::actions::{SubtaskAction, SubtaskContext, SubtaskLogger};
use taskflow_domain::entities::{
    SubtaskInstance, SubtaskOperation, SubtaskState, TaskOperation, TaskType,
};
use taskflow_domain::registry::ActionRegistry;
use taskflow_domain::repositories::{CasOutcome, TaskStore};
use taskflow_infrastructure::{MetricsCollector, StructuredLogger};

use crate::executor_pool::{ExecutorPools, PoolSlot};
use crate::running_registry::{log_interruption, RunningRegistry};

/// 一次成功的认领
pub struct ClaimedSubtask {
    /// 认领后的快照，版本号用于完成时的状态转换
    pub subtask: SubtaskInstance,
    pub direction: TaskOperation,
    pub task_type: TaskType,
    action: Arc<dyn SubtaskAction>,
    slot: PoolSlot,
}

/// 执行 future 与计时器共享的依赖
#[derive(Clone)]
struct ExecutionEnv {
    store: Arc<dyn TaskStore>,
    registry: RunningRegistry,
    metrics: Arc<MetricsCollector>,
    host_id: String,
}

pub struct SubtaskDispatcher {
    env: ExecutionEnv,
    actions: Arc<ActionRegistry>,
    pools: Arc<ExecutorPools>,
}

impl SubtaskDispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        actions: Arc<ActionRegistry>,
        pools: Arc<ExecutorPools>,
        registry: RunningRegistry,
        host_id: impl Into<String>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            env: ExecutionEnv {
                store,
                registry,
                metrics,
                host_id: host_id.into(),
            },
            actions,
            pools,
        }
    }

    /// 扫描 READY 子任务并派发，返回本轮启动的执行数
    pub async fn dispatch_ready_subtasks(&self) -> TaskflowResult<usize> {
        let ids = self
            .env
            .store
            .find_subtask_ids_by_state(SubtaskState::Ready, None)
            .await?;

        let mut launched = 0;
        for id in ids {
            match self.claim(id).await {
                Ok(Some(claimed)) => {
                    self.launch(claimed).await;
                    launched += 1;
                }
                Ok(None) => {}
                Err(e) => error!("派发子任务 {} 失败: {}", id, e),
            }
        }
        Ok(launched)
    }

    /// 认领子任务：重新确认状态、合并上游上下文、标记执行节点并转为 RUNNING
    ///
    /// 返回 `None` 表示本轮不处理（状态已变化、任务已结束、执行池已满或竞争失败）。
    #[instrument(skip(self))]
    pub async fn claim(&self, subtask_id: i64) -> TaskflowResult<Option<ClaimedSubtask>> {
        let store = &self.env.store;
        let Some(mut subtask) = store.get_subtask(subtask_id).await? else {
            return Ok(None);
        };
        if subtask.state != SubtaskState::Ready {
            return Ok(None);
        }

        let task = match store.get_task(subtask.task_id).await? {
            Some(task) if task.is_running() => task,
            _ => {
                debug!("{} 所属任务未在运行，跳过", subtask.entity_description());
                return Ok(None);
            }
        };

        let pool = self.pools.for_task_type(task.task_type);
        let Some(slot) = pool.try_reserve() else {
            debug!("执行池 {} 已满，{} 留待下一轮", pool.name(), subtask.entity_description());
            return Ok(None);
        };

        let Some(action) = self.actions.get(&subtask.action) else {
            warn!("{} 引用了未注册的动作 {}", subtask.entity_description(), subtask.action);
            subtask.state = SubtaskState::Failed;
            subtask.end_time = Some(Utc::now());
            if store
                .transition_subtask(&mut subtask, SubtaskState::Ready)
                .await?
                == CasOutcome::Applied
            {
                SubtaskLogger::new(subtask.id, subtask.run_time, store.clone())
                    .log(format!("动作 {} 未注册", subtask.action))
                    .await;
            }
            return Ok(None);
        };

        let direction = task.operation;
        match direction {
            TaskOperation::Execute => {
                for upstream_id in subtask.upstreams.clone() {
                    if let Some(upstream) = store.get_subtask(upstream_id).await? {
                        subtask.context.merge(&upstream.context);
                    }
                }
            }
            TaskOperation::Rollback => subtask.operation = SubtaskOperation::Rollback,
        }

        let now = Utc::now();
        if subtask.run_time == 0 {
            subtask.run_time = 1;
        }
        subtask.state = SubtaskState::Running;
        subtask.executor = Some(self.env.host_id.clone());
        subtask.latest_execution_start_time = Some(now);
        subtask.start_time.get_or_insert(now);
        subtask.end_time = None;

        match store
            .transition_subtask(&mut subtask, SubtaskState::Ready)
            .await?
        {
            CasOutcome::Applied => {
                StructuredLogger::log_subtask_claimed(
                    subtask.id,
                    subtask.task_id,
                    &subtask.action,
                    subtask.run_time,
                    &self.env.host_id,
                );
                Ok(Some(ClaimedSubtask {
                    subtask,
                    direction,
                    task_type: task.task_type,
                    action,
                    slot,
                }))
            }
            CasOutcome::Conflict => {
                debug!("{} 已被其他执行者认领", subtask.entity_description());
                self.env.metrics.record_cas_conflict();
                Ok(None)
            }
        }
    }

    /// 在执行池中启动已认领的子任务并布置超时计时器
    pub async fn launch(&self, claimed: ClaimedSubtask) {
        let ClaimedSubtask {
            subtask,
            direction,
            action,
            slot,
            ..
        } = claimed;
        let subtask_id = subtask.id;
        let attempt = subtask.run_time;
        let timeout_seconds = subtask.timeout_seconds;

        // 句柄登记完成后才开始执行，保证完成时一定能注销计时器
        let (start_tx, start_rx) = oneshot::channel::<()>();
        let env = self.env.clone();
        let future = slot.spawn(async move {
            if start_rx.await.is_err() {
                return;
            }
            env.run(subtask, direction, action).await;
        });

        let env = self.env.clone();
        let timer = tokio::spawn(async move {
            env.expire_after(subtask_id, attempt, timeout_seconds).await;
        });

        self.env
            .registry
            .register(subtask_id, attempt, future.abort_handle(), timer.abort_handle())
            .await;
        let _ = start_tx.send(());
    }
}

impl ExecutionEnv {
    async fn run(
        &self,
        mut subtask: SubtaskInstance,
        direction: TaskOperation,
        action: Arc<dyn SubtaskAction>,
    ) {
        let attempt = subtask.run_time;
        let logger = SubtaskLogger::new(subtask.id, attempt, self.store.clone());
        logger
            .log(format!(
                "开始{}，第 {} 次执行，执行节点 {}",
                direction_label(direction),
                attempt,
                self.host_id
            ))
            .await;

        let ctx = SubtaskContext {
            subtask_id: subtask.id,
            task_id: subtask.task_id,
            parallel_idx: subtask.parallel_idx,
            attempt,
            context: subtask.context.clone(),
            logger: logger.clone(),
        };
        let started = Instant::now();
        let call = match direction {
            TaskOperation::Execute => action.execute(ctx),
            TaskOperation::Rollback => action.rollback(ctx),
        };
        let result = AssertUnwindSafe(call)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(TaskflowError::task_execution(format!(
                    "panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        let elapsed = started.elapsed();
        self.registry.finish(subtask.id, attempt).await;

        let failure = match result {
            Ok(context) => {
                subtask.context = context;
                subtask.state = match direction {
                    TaskOperation::Execute => SubtaskState::Successful,
                    TaskOperation::Rollback => SubtaskState::Pending,
                };
                None
            }
            Err(e) => {
                subtask.state = SubtaskState::Failed;
                Some(e.to_string())
            }
        };
        subtask.end_time = Some(Utc::now());

        let outcome = match self
            .store
            .transition_subtask(&mut subtask, SubtaskState::Running)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("保存 {} 的执行结果失败: {}", subtask.entity_description(), e);
                return;
            }
        };
        if outcome == CasOutcome::Conflict {
            // 计时器或取消已抢先结束本次执行
            debug!("{} 的执行结果被丢弃，状态已被其他组件推进", subtask.entity_description());
            self.metrics.record_cas_conflict();
            return;
        }

        self.metrics
            .record_subtask_execution(failure.is_none(), elapsed.as_secs_f64());
        match failure {
            None => {
                logger
                    .log(format!("{}成功，耗时 {:?}", direction_label(direction), elapsed))
                    .await;
                StructuredLogger::log_subtask_completed(
                    subtask.id,
                    subtask.task_id,
                    direction.as_str(),
                    elapsed.as_millis() as u64,
                );
            }
            Some(message) => {
                logger
                    .log(format!("{}失败: {}", direction_label(direction), message))
                    .await;
                StructuredLogger::log_subtask_failed(subtask.id, subtask.task_id, attempt, &message);
            }
        }
    }

    /// 超时计时器：到期后确认子任务仍在执行同一次尝试，标记失败并中断执行
    async fn expire_after(&self, subtask_id: i64, attempt: i32, timeout_seconds: i64) {
        tokio::time::sleep(Duration::from_secs(timeout_seconds.max(0) as u64)).await;

        let mut subtask = match self.store.get_subtask(subtask_id).await {
            Ok(Some(subtask)) => subtask,
            Ok(None) => return,
            Err(e) => {
                error!("超时检查读取子任务 {} 失败: {}", subtask_id, e);
                return;
            }
        };
        if subtask.state != SubtaskState::Running || subtask.run_time != attempt {
            return;
        }

        subtask.state = SubtaskState::Failed;
        subtask.end_time = Some(Utc::now());
        match self
            .store
            .transition_subtask(&mut subtask, SubtaskState::Running)
            .await
        {
            Ok(CasOutcome::Applied) => {
                let local = self.registry.expire(subtask_id, attempt).await;
                log_interruption(self.store.clone(), &subtask, "timeout", local).await;
                StructuredLogger::log_subtask_timeout(subtask.id, subtask.task_id, timeout_seconds);
                self.metrics.record_subtask_timeout();
            }
            Ok(CasOutcome::Conflict) => {
                debug!("{} 已结束，忽略超时", subtask.entity_description());
            }
            Err(e) => error!("标记 {} 超时失败: {}", subtask.entity_description(), e),
        }
    }
}

/// 动作 panic 时的说明文字
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn direction_label(direction: TaskOperation) -> &'static str {
    match direction {
        TaskOperation::Execute => "执行",
        TaskOperation::Rollback => "回滚",
    }
}

#[async_trait]
impl Sweeper for SubtaskDispatcher {
    fn name(&self) -> &'static str {
        "subtask_dispatcher"
    }

    async fn sweep(&self) -> TaskflowResult<usize> {
        self.dispatch_ready_subtasks().await
    }
}
