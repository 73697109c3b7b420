//! 有界执行池
//!
//! 手动任务与（系统）定时任务使用两个相互独立的池，避免大批定时任务挤占人工操作。
//! 派发器先预留一个执行名额再认领子任务，名额随执行结束（或被中断）一起释放。

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use taskflow_core::ExecutorConfig;
use taskflow_domain::entities::TaskType;

pub struct ExecutorPool {
    name: &'static str,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

/// 已预留的执行名额
pub struct PoolSlot {
    permit: OwnedSemaphorePermit,
}

impl PoolSlot {
    /// 在名额内运行 future，future 结束或被中断时归还名额
    pub fn spawn<F>(self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self.permit;
        tokio::spawn(async move {
            let _permit = permit;
            future.await;
        })
    }
}

impl ExecutorPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn is_saturated(&self) -> bool {
        self.available() == 0
    }

    /// 尝试预留一个名额，池已满时返回 `None`
    pub fn try_reserve(&self) -> Option<PoolSlot> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| PoolSlot { permit })
    }
}

pub struct ExecutorPools {
    manual: ExecutorPool,
    scheduled: ExecutorPool,
}

impl ExecutorPools {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            manual: ExecutorPool::new("manual", config.manual_pool_size),
            scheduled: ExecutorPool::new("scheduled", config.scheduled_pool_size),
        }
    }

    pub fn for_task_type(&self, task_type: TaskType) -> &ExecutorPool {
        match task_type {
            TaskType::Manual => &self.manual,
            TaskType::Scheduled | TaskType::SysScheduled => &self.scheduled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_slots_are_bounded_and_released() {
        let pool = ExecutorPool::new("manual", 2);
        let first = pool.try_reserve().unwrap();
        let second = pool.try_reserve().unwrap();
        assert!(pool.try_reserve().is_none());
        assert!(pool.is_saturated());

        drop(second);
        assert_eq!(pool.available(), 1);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = first.spawn(async move {
            let _ = rx.await;
        });
        assert_eq!(pool.available(), 1);
        tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_aborted_future_releases_slot() {
        let pool = ExecutorPool::new("scheduled", 1);
        let handle = pool
            .try_reserve()
            .unwrap()
            .spawn(tokio::time::sleep(Duration::from_secs(3600)));
        assert!(pool.is_saturated());

        handle.abort();
        let _ = handle.await;
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_pool_selection_by_task_type() {
        let pools = ExecutorPools::new(&ExecutorConfig {
            manual_pool_size: 3,
            scheduled_pool_size: 1,
        });
        assert_eq!(pools.for_task_type(TaskType::Manual).capacity(), 3);
        assert_eq!(pools.for_task_type(TaskType::Scheduled).name(), "scheduled");
        assert_eq!(pools.for_task_type(TaskType::SysScheduled).capacity(), 1);
    }
}
