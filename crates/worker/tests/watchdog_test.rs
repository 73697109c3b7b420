use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use taskflow_domain::entities::{SubtaskInstance, SubtaskOperation, SubtaskState};
use taskflow_domain::repositories::{
    SubtaskInstanceRepository, SubtaskLogRepository, TaskInstanceRepository,
};
use taskflow_infrastructure::{InMemoryTaskStore, MetricsCollector};
use taskflow_testing_utils::{SubtaskBuilder, TaskBuilder};

use taskflow_worker::{RunningRegistry, SubtaskCancellationHandler, SubtaskWatchdog};

async fn save(store: &InMemoryTaskStore, subtasks: Vec<SubtaskInstance>) -> Vec<SubtaskInstance> {
    store
        .save_task_graph(&TaskBuilder::new().build(), &subtasks)
        .await
        .unwrap()
        .1
}

fn watchdog(store: Arc<InMemoryTaskStore>, registry: RunningRegistry) -> SubtaskWatchdog {
    SubtaskWatchdog::new(store, registry, 48, 60, Arc::new(MetricsCollector::new()))
}

/// 在注册表中放入一个长时间运行的假执行
async fn register_sleeper(registry: &RunningRegistry, id: i64) -> tokio::task::JoinHandle<()> {
    let future = tokio::spawn(tokio::time::sleep(StdDuration::from_secs(3600)));
    let timer = tokio::spawn(tokio::time::sleep(StdDuration::from_secs(3600)));
    registry
        .register(id, 1, future.abort_handle(), timer.abort_handle())
        .await;
    future
}

#[tokio::test]
async fn test_timed_out_subtask_is_failed_after_slack() {
    let store = Arc::new(InMemoryTaskStore::new());
    let registry = RunningRegistry::new();
    let now = Utc::now();
    let subtasks = save(
        &store,
        vec![
            SubtaskBuilder::new(0, "stuck")
                .running("host-a")
                .with_timeout(60)
                .started_at(now - Duration::seconds(200))
                .with_retry(0, 1)
                .build(),
            SubtaskBuilder::new(1, "within-slack")
                .running("host-a")
                .with_timeout(60)
                .started_at(now - Duration::seconds(100))
                .with_retry(0, 1)
                .build(),
        ],
    )
    .await;
    let stuck = register_sleeper(&registry, subtasks[0].id).await;

    let watchdog = watchdog(store.clone(), registry.clone());
    assert_eq!(watchdog.scan_running_subtasks(now).await.unwrap(), 1);

    let failed = store.get_subtask(subtasks[0].id).await.unwrap().unwrap();
    assert_eq!(failed.state, SubtaskState::Failed);
    assert!(stuck.await.unwrap_err().is_cancelled());
    let logs = store.find_logs(subtasks[0].id, Some(1)).await.unwrap();
    assert!(logs[0].content.starts_with("timeout"));

    let waiting = store.get_subtask(subtasks[1].id).await.unwrap().unwrap();
    assert_eq!(waiting.state, SubtaskState::Running);
}

#[tokio::test]
async fn test_cancel_flag_finalizes_remote_execution() {
    let store = Arc::new(InMemoryTaskStore::new());
    let subtasks = save(
        &store,
        vec![SubtaskBuilder::new(0, "A")
            .running("host-b")
            .with_operation(SubtaskOperation::Cancel)
            .with_retry(0, 1)
            .build()],
    )
    .await;

    let watchdog = watchdog(store.clone(), RunningRegistry::new());
    assert_eq!(watchdog.scan_running_subtasks(Utc::now()).await.unwrap(), 1);

    let stored = store.get_subtask(subtasks[0].id).await.unwrap().unwrap();
    assert_eq!(stored.state, SubtaskState::Failed);
    assert_eq!(stored.operation, SubtaskOperation::Cancel);
    let logs = store.find_logs(subtasks[0].id, None).await.unwrap();
    assert!(logs[0].content.starts_with("cancelled"));
}

#[tokio::test]
async fn test_lookback_window_limits_scan() {
    let store = Arc::new(InMemoryTaskStore::new());
    save(
        &store,
        vec![SubtaskBuilder::new(0, "A")
            .running("host-a")
            .with_operation(SubtaskOperation::Cancel)
            .build()],
    )
    .await;

    let watchdog = watchdog(store.clone(), RunningRegistry::new());
    let far_future = Utc::now() + Duration::days(3);
    assert_eq!(watchdog.scan_running_subtasks(far_future).await.unwrap(), 0);
}

#[tokio::test]
async fn test_local_cancellation_interrupts_then_watchdog_fails() {
    let store = Arc::new(InMemoryTaskStore::new());
    let registry = RunningRegistry::new();
    let subtasks = save(
        &store,
        vec![SubtaskBuilder::new(0, "A")
            .running("host-a")
            .with_retry(0, 1)
            .build()],
    )
    .await;
    let id = subtasks[0].id;
    let execution = register_sleeper(&registry, id).await;

    let mut canceling = store.get_subtask(id).await.unwrap().unwrap();
    canceling.state = SubtaskState::Canceling;
    let _ = store
        .transition_subtask(&mut canceling, SubtaskState::Running)
        .await
        .unwrap();

    let handler = SubtaskCancellationHandler::new(
        store.clone(),
        registry.clone(),
        "host-a",
        24,
        Arc::new(MetricsCollector::new()),
    );
    assert_eq!(handler.scan_canceling_subtasks(Utc::now()).await.unwrap(), 1);
    assert!(execution.await.unwrap_err().is_cancelled());

    let flipped = store.get_subtask(id).await.unwrap().unwrap();
    assert_eq!(flipped.state, SubtaskState::Running);
    assert_eq!(flipped.operation, SubtaskOperation::Cancel);

    assert_eq!(
        watchdog(store.clone(), registry)
            .scan_running_subtasks(Utc::now())
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        store.get_subtask(id).await.unwrap().unwrap().state,
        SubtaskState::Failed
    );
}

#[tokio::test]
async fn test_remote_cancellation_skips_interrupt_but_flips_state() {
    let store = Arc::new(InMemoryTaskStore::new());
    let registry = RunningRegistry::new();
    let subtasks = save(
        &store,
        vec![SubtaskBuilder::new(0, "A")
            .with_state(SubtaskState::Canceling)
            .with_executor("host-b")
            .build()],
    )
    .await;
    let id = subtasks[0].id;
    // 同一子任务ID在本地注册表中的条目不属于这次执行
    let unrelated = register_sleeper(&registry, id).await;

    let handler = SubtaskCancellationHandler::new(
        store.clone(),
        registry.clone(),
        "host-a",
        24,
        Arc::new(MetricsCollector::new()),
    );
    assert_eq!(handler.scan_canceling_subtasks(Utc::now()).await.unwrap(), 1);
    assert!(registry.contains(id).await);
    assert!(!unrelated.is_finished());
    unrelated.abort();

    let flipped = store.get_subtask(id).await.unwrap().unwrap();
    assert_eq!(flipped.state, SubtaskState::Running);
    assert_eq!(flipped.operation, SubtaskOperation::Cancel);

    // 已处理过的请求不会被重复处理
    assert_eq!(handler.scan_canceling_subtasks(Utc::now()).await.unwrap(), 0);
}
