pub mod sqlite;

pub use sqlite::SqliteTaskStore;

use std::sync::Arc;

use taskflow_core::{config::StorageBackend, DatabaseConfig, TaskflowResult};
use taskflow_domain::repositories::TaskStore;
use tracing::info;

use crate::memory::InMemoryTaskStore;

/// 按配置创建存储后端，SQLite 后端会在返回前完成建表
pub async fn create_task_store(config: &DatabaseConfig) -> TaskflowResult<Arc<dyn TaskStore>> {
    match config.backend {
        StorageBackend::Memory => {
            info!("使用进程内存储");
            Ok(Arc::new(InMemoryTaskStore::new()))
        }
        StorageBackend::Sqlite => {
            let store = SqliteTaskStore::connect(config).await?;
            store.migrate().await?;
            info!("使用SQLite存储: {}", config.url);
            Ok(Arc::new(store))
        }
    }
}
