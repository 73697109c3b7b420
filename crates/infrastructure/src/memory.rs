//! 进程内存储
//!
//! 与 SQLite 存储语义一致（乐观锁、条件批量更新、原子建图），用于测试和单机演示。
//! 所有状态放在一把异步互斥锁之后，单个操作内部不会让出执行权。

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskflow_core::{TaskflowError, TaskflowResult};
use taskflow_domain::entities::{
    ScheduleType, SubtaskInstance, SubtaskLogEntry, SubtaskState, TaskDefinition, TaskFilter,
    TaskInstance, TaskState,
};
use taskflow_domain::repositories::{
    CasOutcome, SubtaskInstanceRepository, SubtaskLogRepository, TaskDefinitionRepository,
    TaskInstanceRepository,
};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct MemoryState {
    definitions: BTreeMap<i64, TaskDefinition>,
    tasks: BTreeMap<i64, TaskInstance>,
    subtasks: BTreeMap<i64, SubtaskInstance>,
    logs: Vec<SubtaskLogEntry>,
    last_definition_id: i64,
    last_task_id: i64,
    last_subtask_id: i64,
    last_log_id: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn task_count(&self) -> usize {
        self.state.lock().await.tasks.len()
    }
}

#[async_trait]
impl TaskDefinitionRepository for InMemoryTaskStore {
    async fn create_definition(
        &self,
        definition: &TaskDefinition,
    ) -> TaskflowResult<TaskDefinition> {
        let mut state = self.state.lock().await;
        let mut created = definition.clone();
        created.id = next_id(&mut state.last_definition_id);
        state.definitions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_definition(&self, id: i64) -> TaskflowResult<Option<TaskDefinition>> {
        Ok(self.state.lock().await.definitions.get(&id).cloned())
    }

    async fn find_enabled_definitions(
        &self,
        schedule_type: ScheduleType,
    ) -> TaskflowResult<Vec<TaskDefinition>> {
        let state = self.state.lock().await;
        Ok(state
            .definitions
            .values()
            .filter(|d| d.enabled && d.schedule_type == schedule_type)
            .cloned()
            .collect())
    }

    async fn update_definition(&self, definition: &TaskDefinition) -> TaskflowResult<()> {
        let mut state = self.state.lock().await;
        match state.definitions.get_mut(&definition.id) {
            Some(stored) => {
                *stored = definition.clone();
                Ok(())
            }
            None => Err(TaskflowError::DefinitionNotFound { id: definition.id }),
        }
    }
}

#[async_trait]
impl TaskInstanceRepository for InMemoryTaskStore {
    async fn save_task_graph(
        &self,
        task: &TaskInstance,
        subtasks: &[SubtaskInstance],
    ) -> TaskflowResult<(TaskInstance, Vec<SubtaskInstance>)> {
        let mut state = self.state.lock().await;

        // 先校验引用，保证失败时不写入任何数据
        let provisional: HashMap<i64, usize> =
            subtasks.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
        for subtask in subtasks {
            if let Some(unknown) = subtask
                .upstreams
                .iter()
                .chain(subtask.downstreams.iter())
                .find(|r| !provisional.contains_key(r))
            {
                return Err(TaskflowError::DatabaseOperation(format!(
                    "子任务 {} 引用了不存在的子任务 {}",
                    subtask.name, unknown
                )));
            }
        }

        let mut saved_task = task.clone();
        saved_task.id = next_id(&mut state.last_task_id);
        saved_task.version = 1;

        let mut id_map = HashMap::with_capacity(subtasks.len());
        for subtask in subtasks {
            let id = next_id(&mut state.last_subtask_id);
            id_map.insert(subtask.id, id);
        }

        let mut saved_subtasks = Vec::with_capacity(subtasks.len());
        for subtask in subtasks {
            let mut saved = subtask.clone();
            saved.id = id_map[&subtask.id];
            saved.task_id = saved_task.id;
            saved.upstreams = subtask.upstreams.iter().map(|u| id_map[u]).collect();
            saved.downstreams = subtask.downstreams.iter().map(|d| id_map[d]).collect();
            saved.version = 1;
            state.subtasks.insert(saved.id, saved.clone());
            saved_subtasks.push(saved);
        }

        state.tasks.insert(saved_task.id, saved_task.clone());
        debug!(
            "保存任务图: 任务 {} 共 {} 个子任务",
            saved_task.id,
            saved_subtasks.len()
        );
        Ok((saved_task, saved_subtasks))
    }

    async fn get_task(&self, id: i64) -> TaskflowResult<Option<TaskInstance>> {
        Ok(self.state.lock().await.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> TaskflowResult<Vec<TaskInstance>> {
        let state = self.state.lock().await;
        let tasks = state
            .tasks
            .values()
            .rev()
            .filter(|t| filter.state.map_or(true, |s| t.state == s))
            .filter(|t| filter.task_type.map_or(true, |ty| t.task_type == ty))
            .filter(|t| {
                filter
                    .name_pattern
                    .as_deref()
                    .map_or(true, |p| t.name.contains(p))
            })
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(tasks)
    }

    async fn find_running_task_ids(&self) -> TaskflowResult<Vec<i64>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Running)
            .map(|t| t.id)
            .collect())
    }

    async fn transition_task(
        &self,
        task: &mut TaskInstance,
        expected: TaskState,
    ) -> TaskflowResult<CasOutcome> {
        let mut state = self.state.lock().await;
        let stored = state
            .tasks
            .get_mut(&task.id)
            .ok_or(TaskflowError::TaskNotFound { id: task.id })?;
        if stored.version != task.version || stored.state != expected {
            return Ok(CasOutcome::Conflict);
        }
        task.version += 1;
        *stored = task.clone();
        Ok(CasOutcome::Applied)
    }
}

#[async_trait]
impl SubtaskInstanceRepository for InMemoryTaskStore {
    async fn get_subtask(&self, id: i64) -> TaskflowResult<Option<SubtaskInstance>> {
        Ok(self.state.lock().await.subtasks.get(&id).cloned())
    }

    async fn find_subtasks_by_task(&self, task_id: i64) -> TaskflowResult<Vec<SubtaskInstance>> {
        let state = self.state.lock().await;
        Ok(state
            .subtasks
            .values()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn find_subtask_ids_by_state(
        &self,
        subtask_state: SubtaskState,
        since: Option<DateTime<Utc>>,
    ) -> TaskflowResult<Vec<i64>> {
        let state = self.state.lock().await;
        Ok(state
            .subtasks
            .values()
            .filter(|s| s.state == subtask_state)
            .filter(|s| since.map_or(true, |since| s.create_time >= since))
            .map(|s| s.id)
            .collect())
    }

    async fn update_subtask_states(
        &self,
        ids: &[i64],
        expected: &[SubtaskState],
        new_state: SubtaskState,
    ) -> TaskflowResult<u64> {
        let mut state = self.state.lock().await;
        let mut updated = 0;
        for id in ids {
            if let Some(subtask) = state.subtasks.get_mut(id) {
                if expected.contains(&subtask.state) {
                    subtask.state = new_state;
                    subtask.version += 1;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn transition_subtask(
        &self,
        subtask: &mut SubtaskInstance,
        expected: SubtaskState,
    ) -> TaskflowResult<CasOutcome> {
        let mut state = self.state.lock().await;
        let stored = state
            .subtasks
            .get_mut(&subtask.id)
            .ok_or(TaskflowError::SubtaskNotFound { id: subtask.id })?;
        if stored.version != subtask.version || stored.state != expected {
            return Ok(CasOutcome::Conflict);
        }
        subtask.version += 1;
        *stored = subtask.clone();
        Ok(CasOutcome::Applied)
    }
}

#[async_trait]
impl SubtaskLogRepository for InMemoryTaskStore {
    async fn append_log(
        &self,
        subtask_id: i64,
        run_time: i32,
        content: &str,
    ) -> TaskflowResult<()> {
        let mut state = self.state.lock().await;
        let id = next_id(&mut state.last_log_id);
        state.logs.push(SubtaskLogEntry {
            id,
            subtask_id,
            run_time,
            content: content.to_string(),
            create_time: Utc::now(),
        });
        Ok(())
    }

    async fn find_logs(
        &self,
        subtask_id: i64,
        run_time: Option<i32>,
    ) -> TaskflowResult<Vec<SubtaskLogEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .logs
            .iter()
            .filter(|l| l.subtask_id == subtask_id)
            .filter(|l| run_time.map_or(true, |r| l.run_time == r))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_domain::entities::TaskType;

    fn graph() -> (TaskInstance, Vec<SubtaskInstance>) {
        let task = TaskInstance::new("upgrade", TaskType::Manual, "host-a");
        let mut a = SubtaskInstance::new(0, "A", "noop");
        a.id = 0;
        a.downstreams = vec![1];
        let mut b = SubtaskInstance::new(0, "B", "noop");
        b.id = 1;
        b.upstreams = vec![0];
        (task, vec![a, b])
    }

    #[tokio::test]
    async fn test_save_task_graph_remaps_ids() {
        let store = InMemoryTaskStore::new();
        store.save_task_graph(&graph().0, &graph().1).await.unwrap();
        let (task, subtasks) = store.save_task_graph(&graph().0, &graph().1).await.unwrap();

        assert_eq!(task.id, 2);
        assert_eq!(subtasks[0].id, 3);
        assert_eq!(subtasks[0].downstreams, vec![4]);
        assert_eq!(subtasks[1].upstreams, vec![3]);
        assert!(subtasks.iter().all(|s| s.task_id == 2));
        assert_eq!(store.find_subtasks_by_task(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dangling_reference_writes_nothing() {
        let store = InMemoryTaskStore::new();
        let (task, mut subtasks) = graph();
        subtasks[1].upstreams.push(9);
        assert!(store.save_task_graph(&task, &subtasks).await.is_err());
        assert_eq!(store.task_count().await, 0);
    }

    #[tokio::test]
    async fn test_stale_snapshot_conflicts() {
        let store = InMemoryTaskStore::new();
        let (_, subtasks) = store.save_task_graph(&graph().0, &graph().1).await.unwrap();

        let mut first = subtasks[0].clone();
        let mut second = subtasks[0].clone();

        first.state = SubtaskState::Ready;
        assert!(store
            .transition_subtask(&mut first, SubtaskState::Pending)
            .await
            .unwrap()
            .is_applied());

        second.state = SubtaskState::Failed;
        assert!(store
            .transition_subtask(&mut second, SubtaskState::Pending)
            .await
            .unwrap()
            .is_conflict());

        let stored = store.get_subtask(first.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SubtaskState::Ready);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_conditional_batch_update() {
        let store = InMemoryTaskStore::new();
        let (_, subtasks) = store.save_task_graph(&graph().0, &graph().1).await.unwrap();
        let ids: Vec<i64> = subtasks.iter().map(|s| s.id).collect();

        let mut a = subtasks[0].clone();
        a.state = SubtaskState::Running;
        let _ = store
            .transition_subtask(&mut a, SubtaskState::Pending)
            .await
            .unwrap();

        let updated = store
            .update_subtask_states(&ids, &[SubtaskState::Pending], SubtaskState::Ready)
            .await
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(
            store.get_subtask(ids[0]).await.unwrap().unwrap().state,
            SubtaskState::Running
        );
        assert_eq!(
            store.get_subtask(ids[1]).await.unwrap().unwrap().state,
            SubtaskState::Ready
        );
    }

    #[tokio::test]
    async fn test_logs_filtered_by_attempt() {
        let store = InMemoryTaskStore::new();
        store.append_log(1, 1, "first").await.unwrap();
        store.append_log(1, 2, "second").await.unwrap();
        store.append_log(2, 1, "other").await.unwrap();

        assert_eq!(store.find_logs(1, None).await.unwrap().len(), 2);
        let second = store.find_logs(1, Some(2)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].content, "second");
    }
}
