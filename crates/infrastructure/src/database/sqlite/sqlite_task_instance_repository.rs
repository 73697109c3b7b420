use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};
use taskflow_core::{TaskflowError, TaskflowResult};
use taskflow_domain::entities::{SubtaskInstance, TaskFilter, TaskInstance, TaskState};
use taskflow_domain::repositories::{CasOutcome, TaskInstanceRepository};
use tracing::{debug, instrument};

use super::{SqliteTaskStore, TASK_COLUMNS};

#[async_trait]
impl TaskInstanceRepository for SqliteTaskStore {
    #[instrument(skip(self, task, subtasks), fields(
        task.name = %task.name,
        subtasks = subtasks.len(),
    ))]
    async fn save_task_graph(
        &self,
        task: &TaskInstance,
        subtasks: &[SubtaskInstance],
    ) -> TaskflowResult<(TaskInstance, Vec<SubtaskInstance>)> {
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

        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO task_instances (name, definition_id, operation, state, task_type, creator,
                trace_id, tenant_id, start_time, end_time, concurrency, executor, context,
                prohibit_rollback, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(&task.name)
        .bind(task.definition_id)
        .bind(task.operation.as_str())
        .bind(task.state.as_str())
        .bind(task.task_type.as_str())
        .bind(&task.creator)
        .bind(&task.trace_id)
        .bind(task.tenant_id)
        .bind(task.start_time)
        .bind(task.end_time)
        .bind(task.concurrency)
        .bind(&task.executor)
        .bind(task.context.to_json()?)
        .bind(task.prohibit_rollback)
        .execute(&mut *tx)
        .await?;

        let mut saved_task = task.clone();
        saved_task.id = result.last_insert_rowid();
        saved_task.version = 1;

        // 第一遍插入拿到正式ID，第二遍写入重映射后的上下游
        let mut id_map = HashMap::with_capacity(subtasks.len());
        for subtask in subtasks {
            let result = sqlx::query(
                r#"
                INSERT INTO subtask_instances (task_id, name, action, state, operation,
                    retry_count, run_time, timeout_seconds, parallel_idx, executor, context,
                    create_time, start_time, latest_execution_start_time, end_time, version)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
                "#,
            )
            .bind(saved_task.id)
            .bind(&subtask.name)
            .bind(&subtask.action)
            .bind(subtask.state.as_str())
            .bind(subtask.operation.as_str())
            .bind(subtask.retry_count)
            .bind(subtask.run_time)
            .bind(subtask.timeout_seconds)
            .bind(subtask.parallel_idx)
            .bind(&subtask.executor)
            .bind(subtask.context.to_json()?)
            .bind(subtask.create_time)
            .bind(subtask.start_time)
            .bind(subtask.latest_execution_start_time)
            .bind(subtask.end_time)
            .execute(&mut *tx)
            .await?;
            id_map.insert(subtask.id, result.last_insert_rowid());
        }

        let mut saved_subtasks = Vec::with_capacity(subtasks.len());
        for subtask in subtasks {
            let mut saved = subtask.clone();
            saved.id = id_map[&subtask.id];
            saved.task_id = saved_task.id;
            saved.upstreams = subtask.upstreams.iter().map(|u| id_map[u]).collect();
            saved.downstreams = subtask.downstreams.iter().map(|d| id_map[d]).collect();
            saved.version = 1;

            sqlx::query("UPDATE subtask_instances SET upstreams = ?, downstreams = ? WHERE id = ?")
                .bind(serde_json::to_string(&saved.upstreams)?)
                .bind(serde_json::to_string(&saved.downstreams)?)
                .bind(saved.id)
                .execute(&mut *tx)
                .await?;
            saved_subtasks.push(saved);
        }

        tx.commit().await?;
        debug!(
            "保存任务图: 任务 {} 共 {} 个子任务",
            saved_task.id,
            saved_subtasks.len()
        );
        Ok((saved_task, saved_subtasks))
    }

    async fn get_task(&self, id: i64) -> TaskflowResult<Option<TaskInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM task_instances WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> TaskflowResult<Vec<TaskInstance>> {
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {TASK_COLUMNS} FROM task_instances WHERE 1 = 1"));

        if let Some(state) = filter.state {
            query.push(" AND state = ").push_bind(state.as_str());
        }
        if let Some(task_type) = filter.task_type {
            query.push(" AND task_type = ").push_bind(task_type.as_str());
        }
        if let Some(pattern) = &filter.name_pattern {
            query.push(" AND name LIKE ").push_bind(format!("%{pattern}%"));
        }
        query.push(" ORDER BY id DESC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = query.build().fetch_all(self.pool()).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn find_running_task_ids(&self) -> TaskflowResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM task_instances WHERE state = ? ORDER BY id",
        )
        .bind(TaskState::Running.as_str())
        .fetch_all(self.pool())
        .await?;
        Ok(ids)
    }

    async fn transition_task(
        &self,
        task: &mut TaskInstance,
        expected: TaskState,
    ) -> TaskflowResult<CasOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE task_instances
            SET operation = ?, state = ?, end_time = ?, concurrency = ?, executor = ?,
                context = ?, prohibit_rollback = ?, version = version + 1
            WHERE id = ? AND version = ? AND state = ?
            "#,
        )
        .bind(task.operation.as_str())
        .bind(task.state.as_str())
        .bind(task.end_time)
        .bind(task.concurrency)
        .bind(&task.executor)
        .bind(task.context.to_json()?)
        .bind(task.prohibit_rollback)
        .bind(task.id)
        .bind(task.version)
        .bind(expected.as_str())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            if self.get_task(task.id).await?.is_none() {
                return Err(TaskflowError::TaskNotFound { id: task.id });
            }
            return Ok(CasOutcome::Conflict);
        }
        task.version += 1;
        Ok(CasOutcome::Applied)
    }
}
