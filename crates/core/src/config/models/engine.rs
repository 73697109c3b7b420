use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 引擎各个周期性扫描组件的配置
///
/// 所有扫描间隔均为固定延迟：一轮扫描结束后再等待指定间隔。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 当前执行节点标识，未配置时使用主机名
    pub host_id: Option<String>,
    pub schedule_interval_ms: u64,
    pub aggregate_interval_ms: u64,
    pub dispatch_interval_ms: u64,
    pub retry_interval_ms: u64,
    pub cancel_interval_ms: u64,
    pub watchdog_interval_ms: u64,
    /// 巡检判定超时时在子任务超时时间之上追加的余量
    pub timeout_slack_seconds: i64,
    pub watchdog_lookback_hours: i64,
    pub retry_lookback_hours: i64,
    pub cancel_lookback_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host_id: None,
            schedule_interval_ms: 1_000,
            aggregate_interval_ms: 1_000,
            dispatch_interval_ms: 500,
            retry_interval_ms: 1_000,
            cancel_interval_ms: 1_000,
            watchdog_interval_ms: 5_000,
            timeout_slack_seconds: 60,
            watchdog_lookback_hours: 48,
            retry_lookback_hours: 24,
            cancel_lookback_hours: 24,
        }
    }
}

impl EngineConfig {
    /// 解析当前节点标识
    pub fn resolved_host_id(&self) -> String {
        match &self.host_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string()),
        }
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_millis(self.schedule_interval_ms)
    }

    pub fn aggregate_interval(&self) -> Duration {
        Duration::from_millis(self.aggregate_interval_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn cancel_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_interval_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let intervals = [
            ("schedule_interval_ms", self.schedule_interval_ms),
            ("aggregate_interval_ms", self.aggregate_interval_ms),
            ("dispatch_interval_ms", self.dispatch_interval_ms),
            ("retry_interval_ms", self.retry_interval_ms),
            ("cancel_interval_ms", self.cancel_interval_ms),
            ("watchdog_interval_ms", self.watchdog_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(anyhow::anyhow!("扫描间隔 engine.{name} 必须大于0"));
            }
        }

        if self.timeout_slack_seconds < 0 {
            return Err(anyhow::anyhow!("超时余量不能为负数"));
        }

        let lookbacks = [
            ("watchdog_lookback_hours", self.watchdog_lookback_hours),
            ("retry_lookback_hours", self.retry_lookback_hours),
            ("cancel_lookback_hours", self.cancel_lookback_hours),
        ];
        for (name, value) in lookbacks {
            if value <= 0 {
                return Err(anyhow::anyhow!("回溯窗口 engine.{name} 必须大于0"));
            }
        }

        Ok(())
    }
}

/// 两个有界执行池的容量：手动任务与（系统）定时任务分开
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub manual_pool_size: usize,
    pub scheduled_pool_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            manual_pool_size: 16,
            scheduled_pool_size: 8,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.manual_pool_size == 0 {
            return Err(anyhow::anyhow!("手动任务执行池容量必须大于0"));
        }
        if self.scheduled_pool_size == 0 {
            return Err(anyhow::anyhow!("定时任务执行池容量必须大于0"));
        }
        Ok(())
    }
}
