//! # Taskflow Testing Utils
//!
//! 工作区内各 crate 共享的测试工具：
//!
//! - **Builders**: 任务、子任务、定义的测试数据构建器
//! - **Actions**: 可控行为的子任务动作（成功、失败、睡眠、记录执行顺序）
//! - **Helpers**: 静态模板、条件等待
//!
//! 存储层测试替身直接使用 `InMemoryTaskStore`。
//!
//! ```toml
//! [dev-dependencies]
//! taskflow-testing-utils = { path = "../testing-utils" }
//! ```

pub mod actions;
pub mod builders;
pub mod helpers;

pub use actions::*;
pub use builders::*;
pub use helpers::*;
