use async_trait::async_trait;
use chrono::Utc;
use taskflow_core::TaskflowResult;
use taskflow_domain::entities::SubtaskLogEntry;
use taskflow_domain::repositories::SubtaskLogRepository;

use super::SqliteTaskStore;

#[async_trait]
impl SubtaskLogRepository for SqliteTaskStore {
    async fn append_log(
        &self,
        subtask_id: i64,
        run_time: i32,
        content: &str,
    ) -> TaskflowResult<()> {
        sqlx::query(
            "INSERT INTO subtask_logs (subtask_id, run_time, content, create_time) VALUES (?, ?, ?, ?)",
        )
        .bind(subtask_id)
        .bind(run_time)
        .bind(content)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn find_logs(
        &self,
        subtask_id: i64,
        run_time: Option<i32>,
    ) -> TaskflowResult<Vec<SubtaskLogEntry>> {
        let rows = match run_time {
            Some(run_time) => {
                sqlx::query(
                    "SELECT id, subtask_id, run_time, content, create_time FROM subtask_logs \
                     WHERE subtask_id = ? AND run_time = ? ORDER BY id",
                )
                .bind(subtask_id)
                .bind(run_time)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, subtask_id, run_time, content, create_time FROM subtask_logs \
                     WHERE subtask_id = ? ORDER BY id",
                )
                .bind(subtask_id)
                .fetch_all(self.pool())
                .await?
            }
        };

        rows.iter().map(Self::row_to_log).collect()
    }
}
