//! 可观测性
//!
//! - 结构化日志事件
//! - 基于 `metrics` 门面的计数器与直方图（不安装导出器时为空操作）

pub mod metrics_collector;
pub mod structured_logger;

pub use metrics_collector::MetricsCollector;
pub use structured_logger::StructuredLogger;
