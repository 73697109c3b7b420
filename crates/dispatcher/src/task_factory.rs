use std::sync::Arc;

use taskflow_core::TaskflowResult;
use taskflow_domain::entities::{SubtaskInstance, SubtaskState, TaskInstance, TaskOperation, TaskType};
use taskflow_domain::registry::ActionRegistry;
use taskflow_domain::repositories::TaskStore;
use taskflow_domain::template::{Argument, TaskTemplate};
use taskflow_infrastructure::{MetricsCollector, StructuredLogger};
use tracing::instrument;

use crate::concurrency_gate::ConcurrencyGate;

/// 物化请求
pub struct NewTask {
    pub name: String,
    pub template: TaskTemplate,
    pub argument: Argument,
    pub task_type: TaskType,
    pub definition_id: Option<i64>,
    pub creator: String,
}

/// 从模板和参数构建任务图并原子保存
pub struct TaskFactory {
    store: Arc<dyn TaskStore>,
    actions: Arc<ActionRegistry>,
    host_id: String,
    metrics: Arc<MetricsCollector>,
}

impl TaskFactory {
    pub fn new(
        store: Arc<dyn TaskStore>,
        actions: Arc<ActionRegistry>,
        host_id: impl Into<String>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            actions,
            host_id: host_id.into(),
            metrics,
        }
    }

    /// 生成子任务、在内存中放行首批 READY 子任务，然后一次性保存
    #[instrument(skip(self, request), fields(task.name = %request.name))]
    pub async fn create_task(
        &self,
        request: NewTask,
    ) -> TaskflowResult<(TaskInstance, Vec<SubtaskInstance>)> {
        let NewTask {
            name,
            template,
            argument,
            task_type,
            definition_id,
            creator,
        } = request;

        let mut subtasks = template.generate_subtasks(&argument, &self.actions)?;

        let mut task = TaskInstance::new(name, task_type, self.host_id.clone());
        task.definition_id = definition_id;
        task.creator = creator;
        task.concurrency = argument.concurrency;
        task.context = argument.context;
        task.prohibit_rollback = argument.prohibit_rollback;
        task.tenant_id = argument.tenant_id;

        let admitted = ConcurrencyGate::admit(TaskOperation::Execute, &subtasks, task.concurrency);
        for subtask in subtasks.iter_mut().filter(|s| admitted.contains(&s.id)) {
            subtask.state = SubtaskState::Ready;
        }

        let (task, subtasks) = self.store.save_task_graph(&task, &subtasks).await?;

        self.metrics.record_task_created();
        StructuredLogger::log_task_graph_created(
            task.id,
            &task.name,
            task.task_type.as_str(),
            subtasks.len(),
        );
        Ok((task, subtasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_domain::actions::{SubtaskAction, SubtaskContext};
    use taskflow_domain::repositories::SubtaskInstanceRepository;
    use taskflow_domain::TaskContext;
    use taskflow_infrastructure::InMemoryTaskStore;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl SubtaskAction for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        async fn execute(&self, ctx: SubtaskContext) -> TaskflowResult<TaskContext> {
            Ok(ctx.context)
        }
    }

    fn factory(store: Arc<InMemoryTaskStore>) -> TaskFactory {
        let mut actions = ActionRegistry::new();
        actions.register(Arc::new(Noop)).unwrap();
        TaskFactory::new(store, Arc::new(actions), "host-a", Arc::new(MetricsCollector::new()))
    }

    #[tokio::test]
    async fn test_roots_are_seeded_ready_within_limit() {
        let store = Arc::new(InMemoryTaskStore::new());
        let template = TaskTemplate::builder("fan")
            .subtask("a", "noop")
            .subtask("b", "noop")
            .subtask("c", "noop")
            .edge("a", "c")
            .build();

        let (task, subtasks) = factory(store.clone())
            .create_task(NewTask {
                name: "fan-1".to_string(),
                template,
                argument: Argument::default().with_concurrency(1),
                task_type: TaskType::Manual,
                definition_id: None,
                creator: "alice".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(task.executor, "host-a");
        assert_eq!(task.concurrency, 1);
        assert_eq!(task.creator, "alice");
        let states: Vec<_> = store
            .find_subtasks_by_task(task.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.state)
            .collect();
        assert_eq!(
            states,
            vec![SubtaskState::Ready, SubtaskState::Pending, SubtaskState::Pending]
        );
        assert_eq!(subtasks[2].upstreams, vec![subtasks[0].id]);
    }

    #[tokio::test]
    async fn test_invalid_template_creates_nothing() {
        let store = Arc::new(InMemoryTaskStore::new());
        let template = TaskTemplate::builder("bad").subtask("a", "missing").build();
        let result = factory(store.clone())
            .create_task(NewTask {
                name: "bad".to_string(),
                template,
                argument: Argument::default(),
                task_type: TaskType::Manual,
                definition_id: None,
                creator: "system".to_string(),
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.task_count().await, 0);
    }
}
