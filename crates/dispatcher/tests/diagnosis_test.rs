use std::sync::Arc;

use taskflow_core::TaskflowError;
use taskflow_domain::repositories::{SubtaskLogRepository, TaskInstanceRepository};
use taskflow_infrastructure::InMemoryTaskStore;
use taskflow_testing_utils::{wire, SubtaskBuilder, TaskBuilder};

use taskflow_dispatcher::DiagnosisService;

#[tokio::test]
async fn test_bundle_groups_logs_per_attempt_in_topological_order() {
    let store = Arc::new(InMemoryTaskStore::new());
    // 故意逆序声明，诊断包按依赖顺序输出
    let mut subtasks = vec![
        SubtaskBuilder::new(0, "verify").build(),
        SubtaskBuilder::new(1, "restore").build(),
    ];
    wire(&mut subtasks, &[(1, 0)]);
    let (task, subtasks) = store
        .save_task_graph(&TaskBuilder::new().with_name("restore-db").build(), &subtasks)
        .await
        .unwrap();
    let verify = subtasks[0].id;
    let restore = subtasks[1].id;

    store.append_log(restore, 1, "downloading backup").await.unwrap();
    store.append_log(restore, 1, "connection reset").await.unwrap();
    store.append_log(restore, 2, "restore finished").await.unwrap();
    store.append_log(verify, 1, "checksum ok").await.unwrap();

    let service = DiagnosisService::new(store.clone());
    let bundle = service.build(task.id).await.unwrap();

    let names: Vec<&str> = bundle.subtasks.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["restore", "verify"]);

    let attempts: Vec<(i64, i32, usize)> = bundle
        .logs
        .iter()
        .map(|l| (l.subtask_id, l.run_time, l.lines.len()))
        .collect();
    assert_eq!(attempts, vec![(restore, 1, 2), (restore, 2, 1), (verify, 1, 1)]);
    assert!(bundle.logs[0].lines[1].ends_with("connection reset"));

    let dir = tempfile::tempdir().unwrap();
    let root = service.write_to(&bundle, dir.path()).await.unwrap();
    assert_eq!(root, dir.path().join(format!("task-{}", task.id)));
    assert!(root.join("task.json").exists());
    assert!(root.join("subtasks.json").exists());

    let log = std::fs::read_to_string(root.join("logs").join(format!("{restore}-1.log"))).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(log.contains("downloading backup"));

    let task_json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(root.join("task.json")).unwrap()).unwrap();
    assert_eq!(task_json["name"], "restore-db");
}

#[tokio::test]
async fn test_unknown_task_is_reported() {
    let service = DiagnosisService::new(Arc::new(InMemoryTaskStore::new()));
    assert!(matches!(
        service.build(7).await,
        Err(TaskflowError::TaskNotFound { id: 7 })
    ));
}
