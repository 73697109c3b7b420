//! 引擎配置
//!
//! 配置按以下顺序加载，后者覆盖前者：
//! 1. 内置默认值
//! 2. TOML 配置文件
//! 3. 环境变量（前缀 `TASKFLOW`，层级分隔符 `__`，例如 `TASKFLOW_ENGINE__HOST_ID`）
//!
//! 所有组件在构造时显式接收所需的配置片段，不存在进程级的全局配置。

pub mod models;

pub use models::{
    AppConfig, DatabaseConfig, DefinitionSeed, EngineConfig, ExecutorConfig, ObservabilityConfig,
    StorageBackend,
};
