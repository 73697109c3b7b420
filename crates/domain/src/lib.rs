pub mod actions;
pub mod context;
pub mod entities;
pub mod graph;
pub mod registry;
pub mod repositories;
pub mod template;

pub use actions::*;
pub use context::TaskContext;
pub use entities::*;
pub use registry::{ActionRegistry, TemplateRegistry};
pub use repositories::*;
pub use taskflow_core::{TaskflowError, TaskflowResult};
pub use template::{Argument, SubtaskSpec, TaskTemplate, TaskTemplateBuilder};
