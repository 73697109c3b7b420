//! 任务图的调度侧组件
//!
//! - `concurrency_gate` - 并发闸门：决定哪些子任务可以进入 READY
//! - `cron_utils` - CRON 表达式解析
//! - `task_factory` - 从模板物化任务图
//! - `scheduler` - 扫描任务定义并按时物化
//! - `task_aggregator` - 汇总子任务状态、推进任务图
//! - `retry_service` - 复活仍有重试预算的失败子任务
//! - `task_operations` - 面向运维的任务操作
//! - `diagnosis` - 诊断包

pub mod concurrency_gate;
pub mod cron_utils;
pub mod diagnosis;
pub mod retry_service;
pub mod scheduler;
pub mod task_aggregator;
pub mod task_factory;
pub mod task_operations;

pub use concurrency_gate::ConcurrencyGate;
pub use cron_utils::CronScheduler;
pub use diagnosis::{DiagnosisBundle, DiagnosisService};
pub use retry_service::SubtaskRetryService;
pub use scheduler::TaskScheduler;
pub use task_aggregator::TaskAggregator;
pub use task_factory::{NewTask, TaskFactory};
pub use task_operations::{TaskDetail, TaskOperationService};
