use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use taskflow_core::{TaskflowError, TaskflowResult};
use taskflow_domain::entities::{SubtaskInstance, SubtaskState};
use taskflow_domain::repositories::{CasOutcome, SubtaskInstanceRepository};
use tracing::{debug, instrument};

use super::{SqliteTaskStore, SUBTASK_COLUMNS};

#[async_trait]
impl SubtaskInstanceRepository for SqliteTaskStore {
    async fn get_subtask(&self, id: i64) -> TaskflowResult<Option<SubtaskInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {SUBTASK_COLUMNS} FROM subtask_instances WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(Self::row_to_subtask).transpose()
    }

    async fn find_subtasks_by_task(&self, task_id: i64) -> TaskflowResult<Vec<SubtaskInstance>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBTASK_COLUMNS} FROM subtask_instances WHERE task_id = ? ORDER BY id"
        ))
        .bind(task_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(Self::row_to_subtask).collect()
    }

    async fn find_subtask_ids_by_state(
        &self,
        state: SubtaskState,
        since: Option<DateTime<Utc>>,
    ) -> TaskflowResult<Vec<i64>> {
        let ids = match since {
            Some(since) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM subtask_instances WHERE state = ? AND create_time >= ? ORDER BY id",
                )
                .bind(state.as_str())
                .bind(since)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM subtask_instances WHERE state = ? ORDER BY id",
                )
                .bind(state.as_str())
                .fetch_all(self.pool())
                .await?
            }
        };
        Ok(ids)
    }

    #[instrument(skip(self, ids, expected), fields(count = ids.len(), state = %state))]
    async fn update_subtask_states(
        &self,
        ids: &[i64],
        expected: &[SubtaskState],
        state: SubtaskState,
    ) -> TaskflowResult<u64> {
        if ids.is_empty() || expected.is_empty() {
            return Ok(0);
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "UPDATE subtask_instances SET version = version + 1, state = ",
        );
        query.push_bind(state.as_str());
        query.push(" WHERE id IN (");
        {
            let mut separated = query.separated(", ");
            for id in ids {
                separated.push_bind(*id);
            }
        }
        query.push(") AND state IN (");
        {
            let mut separated = query.separated(", ");
            for expected_state in expected {
                separated.push_bind(expected_state.as_str());
            }
        }
        query.push(")");

        let result = query.build().execute(self.pool()).await?;
        debug!("批量更新子任务状态: {} 行", result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn transition_subtask(
        &self,
        subtask: &mut SubtaskInstance,
        expected: SubtaskState,
    ) -> TaskflowResult<CasOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE subtask_instances
            SET state = ?, operation = ?, retry_count = ?, run_time = ?, timeout_seconds = ?,
                executor = ?, context = ?, start_time = ?, latest_execution_start_time = ?,
                end_time = ?, version = version + 1
            WHERE id = ? AND version = ? AND state = ?
            "#,
        )
        .bind(subtask.state.as_str())
        .bind(subtask.operation.as_str())
        .bind(subtask.retry_count)
        .bind(subtask.run_time)
        .bind(subtask.timeout_seconds)
        .bind(&subtask.executor)
        .bind(subtask.context.to_json()?)
        .bind(subtask.start_time)
        .bind(subtask.latest_execution_start_time)
        .bind(subtask.end_time)
        .bind(subtask.id)
        .bind(subtask.version)
        .bind(expected.as_str())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            if self.get_subtask(subtask.id).await?.is_none() {
                return Err(TaskflowError::SubtaskNotFound { id: subtask.id });
            }
            return Ok(CasOutcome::Conflict);
        }
        subtask.version += 1;
        Ok(CasOutcome::Applied)
    }
}
