use async_trait::async_trait;
use taskflow_core::{TaskflowError, TaskflowResult};
use taskflow_domain::entities::{ScheduleType, TaskDefinition};
use taskflow_domain::repositories::TaskDefinitionRepository;
use tracing::{debug, instrument};

use super::{SqliteTaskStore, DEFINITION_COLUMNS};

#[async_trait]
impl TaskDefinitionRepository for SqliteTaskStore {
    #[instrument(skip(self, definition), fields(definition.name = %definition.name))]
    async fn create_definition(
        &self,
        definition: &TaskDefinition,
    ) -> TaskflowResult<TaskDefinition> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_definitions (name, template_name, schedule_type, schedule_rule,
                schedule_start_date, schedule_end_date, enabled, last_run_time, next_run_time,
                creator, create_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&definition.name)
        .bind(&definition.template_name)
        .bind(definition.schedule_type.as_str())
        .bind(&definition.schedule_rule)
        .bind(definition.schedule_start_date)
        .bind(definition.schedule_end_date)
        .bind(definition.enabled)
        .bind(definition.last_run_time)
        .bind(definition.next_run_time)
        .bind(&definition.creator)
        .bind(definition.create_time)
        .execute(self.pool())
        .await?;

        let mut created = definition.clone();
        created.id = result.last_insert_rowid();
        debug!("创建任务定义: {} ({})", created.name, created.id);
        Ok(created)
    }

    async fn get_definition(&self, id: i64) -> TaskflowResult<Option<TaskDefinition>> {
        let row = sqlx::query(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM task_definitions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(Self::row_to_definition).transpose()
    }

    async fn find_enabled_definitions(
        &self,
        schedule_type: ScheduleType,
    ) -> TaskflowResult<Vec<TaskDefinition>> {
        let rows = sqlx::query(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM task_definitions \
             WHERE enabled = 1 AND schedule_type = ? ORDER BY id"
        ))
        .bind(schedule_type.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(Self::row_to_definition).collect()
    }

    async fn update_definition(&self, definition: &TaskDefinition) -> TaskflowResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE task_definitions
            SET name = ?, template_name = ?, schedule_type = ?, schedule_rule = ?,
                schedule_start_date = ?, schedule_end_date = ?, enabled = ?,
                last_run_time = ?, next_run_time = ?
            WHERE id = ?
            "#,
        )
        .bind(&definition.name)
        .bind(&definition.template_name)
        .bind(definition.schedule_type.as_str())
        .bind(&definition.schedule_rule)
        .bind(definition.schedule_start_date)
        .bind(definition.schedule_end_date)
        .bind(definition.enabled)
        .bind(definition.last_run_time)
        .bind(definition.next_run_time)
        .bind(definition.id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskflowError::DefinitionNotFound { id: definition.id });
        }
        Ok(())
    }
}
