pub mod sqlite_definition_repository;
pub mod sqlite_log_repository;
pub mod sqlite_subtask_repository;
pub mod sqlite_task_instance_repository;

use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use taskflow_core::{DatabaseConfig, TaskflowError, TaskflowResult};
use taskflow_domain::entities::{SubtaskInstance, SubtaskLogEntry, TaskDefinition, TaskInstance};
use tracing::{debug, info};

pub(crate) const DEFINITION_COLUMNS: &str = "id, name, template_name, schedule_type, schedule_rule, \
    schedule_start_date, schedule_end_date, enabled, last_run_time, next_run_time, creator, create_time";

pub(crate) const TASK_COLUMNS: &str = "id, name, definition_id, operation, state, task_type, creator, \
    trace_id, tenant_id, start_time, end_time, concurrency, executor, context, prohibit_rollback, version";

pub(crate) const SUBTASK_COLUMNS: &str = "id, task_id, name, action, state, operation, retry_count, \
    run_time, timeout_seconds, parallel_idx, executor, context, upstreams, downstreams, create_time, \
    start_time, latest_execution_start_time, end_time, version";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS task_definitions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        template_name TEXT NOT NULL,
        schedule_type TEXT NOT NULL,
        schedule_rule TEXT NOT NULL,
        schedule_start_date TEXT,
        schedule_end_date TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_run_time TEXT,
        next_run_time TEXT,
        creator TEXT NOT NULL,
        create_time TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_instances (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        definition_id INTEGER,
        operation TEXT NOT NULL,
        state TEXT NOT NULL,
        task_type TEXT NOT NULL,
        creator TEXT NOT NULL,
        trace_id TEXT NOT NULL,
        tenant_id INTEGER,
        start_time TEXT NOT NULL,
        end_time TEXT,
        concurrency INTEGER NOT NULL DEFAULT -1,
        executor TEXT NOT NULL,
        context TEXT NOT NULL DEFAULT '{}',
        prohibit_rollback INTEGER NOT NULL DEFAULT 0,
        version INTEGER NOT NULL DEFAULT 1
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_task_instances_state ON task_instances (state)",
    r#"
    CREATE TABLE IF NOT EXISTS subtask_instances (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL REFERENCES task_instances (id),
        name TEXT NOT NULL,
        action TEXT NOT NULL,
        state TEXT NOT NULL,
        operation TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        run_time INTEGER NOT NULL DEFAULT 0,
        timeout_seconds INTEGER NOT NULL,
        parallel_idx INTEGER NOT NULL DEFAULT -1,
        executor TEXT,
        context TEXT NOT NULL DEFAULT '{}',
        upstreams TEXT NOT NULL DEFAULT '[]',
        downstreams TEXT NOT NULL DEFAULT '[]',
        create_time TEXT NOT NULL,
        start_time TEXT,
        latest_execution_start_time TEXT,
        end_time TEXT,
        version INTEGER NOT NULL DEFAULT 1
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_subtask_instances_task ON subtask_instances (task_id)",
    "CREATE INDEX IF NOT EXISTS idx_subtask_instances_state ON subtask_instances (state, create_time)",
    r#"
    CREATE TABLE IF NOT EXISTS subtask_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        subtask_id INTEGER NOT NULL,
        run_time INTEGER NOT NULL,
        content TEXT NOT NULL,
        create_time TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_subtask_logs_subtask ON subtask_logs (subtask_id, run_time)",
];

/// 基于 SQLite 的任务存储
///
/// 状态转换通过 `WHERE id = ? AND version = ? AND state = ?` 的条件更新实现乐观锁，
/// 影响行数为0即视为冲突。
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> TaskflowResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建表和索引，可重复执行
    pub async fn migrate(&self) -> TaskflowResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("SQLite表结构已就绪");
        Ok(())
    }

    pub async fn health_check(&self) -> TaskflowResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        debug!("关闭SQLite连接池");
        self.pool.close().await;
    }

    pub(crate) fn row_to_definition(row: &SqliteRow) -> TaskflowResult<TaskDefinition> {
        Ok(TaskDefinition {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            template_name: row.try_get("template_name")?,
            schedule_type: parse_column(row, "schedule_type")?,
            schedule_rule: row.try_get("schedule_rule")?,
            schedule_start_date: row.try_get("schedule_start_date")?,
            schedule_end_date: row.try_get("schedule_end_date")?,
            enabled: row.try_get("enabled")?,
            last_run_time: row.try_get("last_run_time")?,
            next_run_time: row.try_get("next_run_time")?,
            creator: row.try_get("creator")?,
            create_time: row.try_get("create_time")?,
        })
    }

    pub(crate) fn row_to_task(row: &SqliteRow) -> TaskflowResult<TaskInstance> {
        Ok(TaskInstance {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            definition_id: row.try_get("definition_id")?,
            operation: parse_column(row, "operation")?,
            state: parse_column(row, "state")?,
            task_type: parse_column(row, "task_type")?,
            creator: row.try_get("creator")?,
            trace_id: row.try_get("trace_id")?,
            tenant_id: row.try_get("tenant_id")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            concurrency: row.try_get("concurrency")?,
            executor: row.try_get("executor")?,
            context: json_column(row, "context")?,
            prohibit_rollback: row.try_get("prohibit_rollback")?,
            version: row.try_get("version")?,
        })
    }

    pub(crate) fn row_to_subtask(row: &SqliteRow) -> TaskflowResult<SubtaskInstance> {
        Ok(SubtaskInstance {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            name: row.try_get("name")?,
            action: row.try_get("action")?,
            state: parse_column(row, "state")?,
            operation: parse_column(row, "operation")?,
            retry_count: row.try_get("retry_count")?,
            run_time: row.try_get("run_time")?,
            timeout_seconds: row.try_get("timeout_seconds")?,
            parallel_idx: row.try_get("parallel_idx")?,
            executor: row.try_get("executor")?,
            context: json_column(row, "context")?,
            upstreams: json_column(row, "upstreams")?,
            downstreams: json_column(row, "downstreams")?,
            create_time: row.try_get("create_time")?,
            start_time: row.try_get("start_time")?,
            latest_execution_start_time: row.try_get("latest_execution_start_time")?,
            end_time: row.try_get("end_time")?,
            version: row.try_get("version")?,
        })
    }

    pub(crate) fn row_to_log(row: &SqliteRow) -> TaskflowResult<SubtaskLogEntry> {
        Ok(SubtaskLogEntry {
            id: row.try_get("id")?,
            subtask_id: row.try_get("subtask_id")?,
            run_time: row.try_get("run_time")?,
            content: row.try_get("content")?,
            create_time: row.try_get("create_time")?,
        })
    }
}

/// 以文本保存的枚举列
fn parse_column<T>(row: &SqliteRow, column: &str) -> TaskflowResult<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(TaskflowError::DatabaseOperation)
}

/// 以 JSON 文本保存的列
fn json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> TaskflowResult<T> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}
