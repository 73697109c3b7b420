//! Test helper utilities and common testing patterns

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskflow_domain::actions::TaskSchedule;
use taskflow_domain::template::{Argument, TaskTemplate};

/// 返回固定模板和参数的调度，可在测试中切换就绪状态
pub struct StaticSchedule {
    template: TaskTemplate,
    argument: Argument,
    ready: Arc<AtomicBool>,
}

impl StaticSchedule {
    pub fn new(template: TaskTemplate, argument: Argument) -> Self {
        Self {
            template,
            argument,
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }
}

#[async_trait]
impl TaskSchedule for StaticSchedule {
    async fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn template(&self) -> TaskTemplate {
        self.template.clone()
    }

    fn argument(&self) -> Argument {
        self.argument.clone()
    }
}

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// 轮询条件直到成立或超时
    ///
    /// 使用 tokio 时钟，在暂停时间的测试中同样有效。
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if condition().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        condition().await
    }
}
