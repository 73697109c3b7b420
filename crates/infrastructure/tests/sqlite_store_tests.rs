use chrono::{Duration, Utc};
use taskflow_core::{config::StorageBackend, DatabaseConfig};
use taskflow_domain::entities::{
    ScheduleType, SubtaskInstance, SubtaskOperation, SubtaskState, TaskDefinition, TaskFilter,
    TaskInstance, TaskState, TaskType,
};
use taskflow_domain::repositories::{
    SubtaskInstanceRepository, SubtaskLogRepository, TaskDefinitionRepository,
    TaskInstanceRepository,
};
use taskflow_domain::TaskContext;
use taskflow_infrastructure::{create_task_store, SqliteTaskStore};

async fn setup_store() -> SqliteTaskStore {
    let config = DatabaseConfig {
        backend: StorageBackend::Sqlite,
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        connection_timeout_seconds: 5,
    };
    let store = SqliteTaskStore::connect(&config).await.unwrap();
    store.migrate().await.unwrap();
    store
}

fn chain_graph() -> (TaskInstance, Vec<SubtaskInstance>) {
    let mut task = TaskInstance::new("upgrade", TaskType::Manual, "host-a");
    task.context = TaskContext::new().with("cluster", "c1");
    task.concurrency = 1;

    let mut a = SubtaskInstance::new(0, "A", "noop");
    a.id = 0;
    a.downstreams = vec![1];
    a.retry_count = 2;
    a.context = task.context.clone();
    let mut b = SubtaskInstance::new(0, "B", "noop");
    b.id = 1;
    b.upstreams = vec![0];
    (task, vec![a, b])
}

#[tokio::test]
async fn test_save_and_load_task_graph() {
    let store = setup_store().await;
    let (task, subtasks) = chain_graph();

    let (saved_task, saved) = store.save_task_graph(&task, &subtasks).await.unwrap();
    assert!(saved_task.id > 0);
    assert_eq!(saved[0].downstreams, vec![saved[1].id]);
    assert_eq!(saved[1].upstreams, vec![saved[0].id]);

    let loaded_task = store.get_task(saved_task.id).await.unwrap().unwrap();
    assert_eq!(loaded_task.concurrency, 1);
    assert_eq!(loaded_task.context.get_str("cluster"), Some("c1"));
    assert_eq!(loaded_task.state, TaskState::Running);
    assert_eq!(loaded_task.version, 1);

    let loaded = store.find_subtasks_by_task(saved_task.id).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].name, "A");
    assert_eq!(loaded[0].retry_count, 2);
    assert_eq!(loaded[1].upstreams, vec![loaded[0].id]);
}

#[tokio::test]
async fn test_subtask_cas_and_conditional_batch_update() {
    let store = setup_store().await;
    let (task, subtasks) = chain_graph();
    let (_, saved) = store.save_task_graph(&task, &subtasks).await.unwrap();
    let ids: Vec<i64> = saved.iter().map(|s| s.id).collect();

    let updated = store
        .update_subtask_states(&ids[..1], &[SubtaskState::Pending], SubtaskState::Ready)
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let mut claimed = store.get_subtask(ids[0]).await.unwrap().unwrap();
    let stale = claimed.clone();
    claimed.state = SubtaskState::Running;
    claimed.run_time = 1;
    claimed.executor = Some("host-a".to_string());
    claimed.latest_execution_start_time = Some(Utc::now());
    assert!(store
        .transition_subtask(&mut claimed, SubtaskState::Ready)
        .await
        .unwrap()
        .is_applied());

    // 同一快照第二次认领失败
    let mut again = stale;
    again.state = SubtaskState::Running;
    assert!(store
        .transition_subtask(&mut again, SubtaskState::Ready)
        .await
        .unwrap()
        .is_conflict());

    // 迟到的批量写入不能把运行中的子任务改回 READY
    let updated = store
        .update_subtask_states(&ids, &[SubtaskState::Pending], SubtaskState::Ready)
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let stored = store.get_subtask(ids[0]).await.unwrap().unwrap();
    assert_eq!(stored.state, SubtaskState::Running);
    assert_eq!(stored.run_time, 1);
    assert_eq!(stored.executor.as_deref(), Some("host-a"));
    assert_eq!(stored.operation, SubtaskOperation::Execute);

    let running = store
        .find_subtask_ids_by_state(SubtaskState::Running, Some(Utc::now() - Duration::hours(1)))
        .await
        .unwrap();
    assert_eq!(running, vec![ids[0]]);
    let future = store
        .find_subtask_ids_by_state(SubtaskState::Running, Some(Utc::now() + Duration::hours(1)))
        .await
        .unwrap();
    assert!(future.is_empty());
}

#[tokio::test]
async fn test_task_transition_and_listing() {
    let store = setup_store().await;
    let (task, subtasks) = chain_graph();
    let (mut saved_task, _) = store.save_task_graph(&task, &subtasks).await.unwrap();
    store
        .save_task_graph(&TaskInstance::new("backup", TaskType::Scheduled, "host-a"), &[])
        .await
        .unwrap();

    saved_task.state = TaskState::Successful;
    saved_task.end_time = Some(Utc::now());
    assert!(store
        .transition_task(&mut saved_task, TaskState::Running)
        .await
        .unwrap()
        .is_applied());
    assert_eq!(saved_task.version, 2);

    let running = store.find_running_task_ids().await.unwrap();
    assert_eq!(running.len(), 1);

    let filter = TaskFilter {
        state: Some(TaskState::Successful),
        ..Default::default()
    };
    let done = store.list_tasks(&filter).await.unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].name, "upgrade");

    let by_name = TaskFilter {
        name_pattern: Some("back".to_string()),
        limit: Some(10),
        ..Default::default()
    };
    assert_eq!(store.list_tasks(&by_name).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_definitions_and_logs() {
    let store = setup_store().await;
    let mut definition =
        TaskDefinition::new("nightly", "backup", ScheduleType::Cron, "0 0 2 * * *");
    definition.schedule_start_date = Some(Utc::now().date_naive());
    let mut created = store.create_definition(&definition).await.unwrap();

    let enabled = store
        .find_enabled_definitions(ScheduleType::Cron)
        .await
        .unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].schedule_start_date, definition.schedule_start_date);

    created.enabled = false;
    created.next_run_time = Some(Utc::now());
    store.update_definition(&created).await.unwrap();
    assert!(store
        .find_enabled_definitions(ScheduleType::Cron)
        .await
        .unwrap()
        .is_empty());

    store.append_log(7, 1, "attempt one").await.unwrap();
    store.append_log(7, 2, "attempt two").await.unwrap();
    let logs = store.find_logs(7, None).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].content, "attempt two");
    assert_eq!(store.find_logs(7, Some(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_memory_backend_from_config() {
    let store = create_task_store(&DatabaseConfig::default()).await.unwrap();
    assert!(store.get_task(1).await.unwrap().is_none());
}
