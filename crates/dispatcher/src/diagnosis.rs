//! 诊断包
//!
//! 汇集任务信息、按拓扑序排列的子任务以及每次执行的日志，可写出为目录：
//!
//! ```text
//! task-<id>/
//!   task.json
//!   subtasks.json
//!   logs/<子任务ID>-<执行次数>.log
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use taskflow_core::{TaskflowError, TaskflowResult};
use taskflow_domain::entities::{SubtaskInstance, TaskInstance};
use taskflow_domain::graph::topological_sort;
use taskflow_domain::repositories::TaskStore;

/// 单个子任务一次执行的日志
#[derive(Debug, Clone, Serialize)]
pub struct AttemptLog {
    pub subtask_id: i64,
    pub subtask_name: String,
    pub run_time: i32,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisBundle {
    pub task: TaskInstance,
    /// 拓扑序
    pub subtasks: Vec<SubtaskInstance>,
    pub logs: Vec<AttemptLog>,
}

pub struct DiagnosisService {
    store: Arc<dyn TaskStore>,
}

impl DiagnosisService {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub async fn build(&self, task_id: i64) -> TaskflowResult<DiagnosisBundle> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(TaskflowError::TaskNotFound { id: task_id })?;
        let subtasks = self.store.find_subtasks_by_task(task_id).await?;

        let order = topological_sort(&subtasks)?;
        let mut by_id: HashMap<i64, SubtaskInstance> =
            subtasks.into_iter().map(|s| (s.id, s)).collect();
        let sorted: Vec<SubtaskInstance> =
            order.iter().filter_map(|id| by_id.remove(id)).collect();

        let mut logs = Vec::new();
        for subtask in &sorted {
            let mut attempts: BTreeMap<i32, Vec<String>> = BTreeMap::new();
            for entry in self.store.find_logs(subtask.id, None).await? {
                attempts.entry(entry.run_time).or_default().push(format!(
                    "{} {}",
                    entry.create_time.format("%Y-%m-%d %H:%M:%S%.3f"),
                    entry.content
                ));
            }
            logs.extend(attempts.into_iter().map(|(run_time, lines)| AttemptLog {
                subtask_id: subtask.id,
                subtask_name: subtask.name.clone(),
                run_time,
                lines,
            }));
        }

        Ok(DiagnosisBundle {
            task,
            subtasks: sorted,
            logs,
        })
    }

    /// 把诊断包写到 `dir/task-<id>/`，返回该目录
    pub async fn write_to(&self, bundle: &DiagnosisBundle, dir: &Path) -> TaskflowResult<PathBuf> {
        let root = dir.join(format!("task-{}", bundle.task.id));
        let logs_dir = root.join("logs");
        tokio::fs::create_dir_all(&logs_dir).await.map_err(io_error)?;

        tokio::fs::write(
            root.join("task.json"),
            serde_json::to_vec_pretty(&bundle.task)?,
        )
        .await
        .map_err(io_error)?;
        tokio::fs::write(
            root.join("subtasks.json"),
            serde_json::to_vec_pretty(&bundle.subtasks)?,
        )
        .await
        .map_err(io_error)?;

        for attempt in &bundle.logs {
            let file = logs_dir.join(format!("{}-{}.log", attempt.subtask_id, attempt.run_time));
            tokio::fs::write(file, attempt.lines.join("\n"))
                .await
                .map_err(io_error)?;
        }

        info!("诊断包已写入 {}", root.display());
        Ok(root)
    }
}

fn io_error(e: std::io::Error) -> TaskflowError {
    TaskflowError::Internal(format!("写入诊断包失败: {e}"))
}
