//! 周期性扫描循环
//!
//! 引擎的每个后台组件都是独立的轮询者：执行一轮扫描，然后固定延迟等待下一轮。
//! 不同组件之间没有进程内共享锁，单轮扫描的错误只记录日志，不会终止循环。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::TaskflowResult;

/// 一个可被周期调度的扫描组件
#[async_trait]
pub trait Sweeper: Send + Sync {
    /// 组件名称，用于日志和指标标签
    fn name(&self) -> &'static str;

    /// 执行一轮扫描，返回本轮处理的条目数
    async fn sweep(&self) -> TaskflowResult<usize>;
}

/// 以固定延迟运行扫描，直到收到关闭信号
pub async fn run_sweep_loop(
    sweeper: Arc<dyn Sweeper>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!("启动扫描循环: {}，间隔 {:?}", sweeper.name(), interval);

    loop {
        let started = Instant::now();
        let result = sweeper.sweep().await;
        record_sweep_duration(sweeper.name(), started.elapsed());
        match result {
            Ok(0) => {}
            Ok(handled) => {
                debug!(
                    "{} 本轮处理 {} 项，耗时 {:?}",
                    sweeper.name(),
                    handled,
                    started.elapsed()
                );
            }
            Err(e) => {
                error!("{} 扫描失败: {}", sweeper.name(), e);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.recv() => {
                info!("收到停止信号，退出扫描循环: {}", sweeper.name());
                break;
            }
        }
    }
}

/// 单轮扫描耗时，按组件名称分标签
pub(crate) fn record_sweep_duration(name: &'static str, elapsed: Duration) {
    histogram!("taskflow_sweep_duration_seconds", "sweeper" => name).record(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::{
        Counter, Gauge, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString,
        Unit,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// 记录直方图名称、标签和取值
    #[derive(Default)]
    struct CapturingRecorder {
        samples: Arc<Mutex<Vec<(String, Vec<(String, String)>, f64)>>>,
    }

    struct CapturedHistogram {
        name: String,
        labels: Vec<(String, String)>,
        samples: Arc<Mutex<Vec<(String, Vec<(String, String)>, f64)>>>,
    }

    impl HistogramFn for CapturedHistogram {
        fn record(&self, value: f64) {
            self.samples
                .lock()
                .unwrap()
                .push((self.name.clone(), self.labels.clone(), value));
        }
    }

    impl Recorder for CapturingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
            Counter::noop()
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::from_arc(Arc::new(CapturedHistogram {
                name: key.name().to_string(),
                labels: key
                    .labels()
                    .map(|l| (l.key().to_string(), l.value().to_string()))
                    .collect(),
                samples: self.samples.clone(),
            }))
        }
    }

    #[test]
    fn test_sweep_duration_is_labelled_by_sweeper() {
        let recorder = CapturingRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            record_sweep_duration("task_aggregator", Duration::from_millis(250));
        });

        let samples = recorder.samples.lock().unwrap();
        assert_eq!(
            *samples,
            vec![(
                "taskflow_sweep_duration_seconds".to_string(),
                vec![("sweeper".to_string(), "task_aggregator".to_string())],
                0.25
            )]
        );
    }

    struct CountingSweeper {
        count: AtomicUsize,
    }

    #[async_trait]
    impl Sweeper for CountingSweeper {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn sweep(&self) -> TaskflowResult<usize> {
            let n = self.count.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Ok(1)
            } else {
                Err(crate::TaskflowError::Internal("boom".to_string()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_errors_and_stops_on_shutdown() {
        let sweeper = Arc::new(CountingSweeper {
            count: AtomicUsize::new(0),
        });
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(run_sweep_loop(
            sweeper.clone(),
            Duration::from_millis(100),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(550)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(sweeper.count.load(Ordering::SeqCst) >= 5);
    }
}
