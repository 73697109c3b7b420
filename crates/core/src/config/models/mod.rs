pub mod app_config;
pub mod database;
pub mod engine;
pub mod observability;

pub use app_config::{AppConfig, DefinitionSeed};
pub use database::{DatabaseConfig, StorageBackend};
pub use engine::{EngineConfig, ExecutorConfig};
pub use observability::ObservabilityConfig;
