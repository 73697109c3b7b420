//! 本进程内正在执行的子任务
//!
//! 子任务ID映射到执行 future 与超时计时器的中断句柄。注册表只在派发该子任务的进程内有效，
//! 跨节点的子任务无法从这里中断，只能依靠巡检的超时判定。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::debug;

use taskflow_domain::actions::SubtaskLogger;
use taskflow_domain::entities::SubtaskInstance;
use taskflow_domain::repositories::TaskStore;

struct RunningHandle {
    attempt: i32,
    future: AbortHandle,
    timer: AbortHandle,
}

#[derive(Clone, Default)]
pub struct RunningRegistry {
    running: Arc<RwLock<HashMap<i64, RunningHandle>>>,
}

impl RunningRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        subtask_id: i64,
        attempt: i32,
        future: AbortHandle,
        timer: AbortHandle,
    ) {
        let mut running = self.running.write().await;
        if let Some(previous) = running.insert(
            subtask_id,
            RunningHandle {
                attempt,
                future,
                timer,
            },
        ) {
            // 旧的执行已不再对应存储中的状态
            previous.future.abort();
            previous.timer.abort();
        }
    }

    /// 执行正常结束：注销并撤销计时器
    pub async fn finish(&self, subtask_id: i64, attempt: i32) {
        if let Some(handle) = self.take_attempt(subtask_id, attempt).await {
            handle.timer.abort();
        }
    }

    /// 计时器触发：注销并中断执行，计时器本身不受影响
    pub async fn expire(&self, subtask_id: i64, attempt: i32) -> bool {
        match self.take_attempt(subtask_id, attempt).await {
            Some(handle) => {
                handle.future.abort();
                true
            }
            None => false,
        }
    }

    /// 外部中断（取消或巡检超时），返回子任务是否在本进程内执行
    pub async fn interrupt(&self, subtask_id: i64) -> bool {
        let handle = self.running.write().await.remove(&subtask_id);
        match handle {
            Some(handle) => {
                handle.future.abort();
                handle.timer.abort();
                debug!("已中断本地执行的子任务 {}", subtask_id);
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, subtask_id: i64) -> bool {
        self.running.read().await.contains_key(&subtask_id)
    }

    pub async fn len(&self) -> usize {
        self.running.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.running.read().await.is_empty()
    }

    async fn take_attempt(&self, subtask_id: i64, attempt: i32) -> Option<RunningHandle> {
        let mut running = self.running.write().await;
        match running.get(&subtask_id) {
            Some(handle) if handle.attempt == attempt => running.remove(&subtask_id),
            _ => None,
        }
    }
}

/// 中断后写入子任务日志
///
/// 超时计时器、巡检和取消共用这一路径，诊断包中看到的中断原因格式一致。
pub async fn log_interruption(
    store: Arc<dyn TaskStore>,
    subtask: &SubtaskInstance,
    reason: &str,
    local: bool,
) {
    let location = if local { "本地执行已中断" } else { "执行不在本节点" };
    SubtaskLogger::new(subtask.id, subtask.run_time, store)
        .log(format!("{reason}: {location}"))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper() -> tokio::task::JoinHandle<()> {
        tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn test_finish_cancels_timer_only_for_matching_attempt() {
        let registry = RunningRegistry::new();
        let future = sleeper();
        let timer = sleeper();
        registry
            .register(1, 2, future.abort_handle(), timer.abort_handle())
            .await;

        registry.finish(1, 1).await;
        assert!(registry.contains(1).await);

        registry.finish(1, 2).await;
        assert!(registry.is_empty().await);
        assert!(timer.await.unwrap_err().is_cancelled());
        assert!(!future.is_finished());
        future.abort();
    }

    #[tokio::test]
    async fn test_expire_aborts_future_and_interrupt_aborts_both() {
        let registry = RunningRegistry::new();
        let future = sleeper();
        let timer = sleeper();
        registry
            .register(7, 1, future.abort_handle(), timer.abort_handle())
            .await;
        assert!(registry.expire(7, 1).await);
        assert!(future.await.unwrap_err().is_cancelled());
        assert!(!registry.expire(7, 1).await);
        timer.abort();

        let future = sleeper();
        let timer = sleeper();
        registry
            .register(8, 1, future.abort_handle(), timer.abort_handle())
            .await;
        assert!(registry.interrupt(8).await);
        assert!(future.await.unwrap_err().is_cancelled());
        assert!(timer.await.unwrap_err().is_cancelled());
        assert!(!registry.interrupt(8).await);
        assert_eq!(registry.len().await, 0);
    }
}
