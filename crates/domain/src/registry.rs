use std::collections::HashMap;
use std::sync::Arc;

use taskflow_core::{TaskflowError, TaskflowResult};

use crate::actions::{SubtaskAction, TaskSchedule};

/// 子任务动作注册表
///
/// 在启动阶段填充，之后以 `Arc` 共享只读。
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn SubtaskAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: Arc<dyn SubtaskAction>) -> TaskflowResult<()> {
        let name = action.name().to_string();
        if self.actions.contains_key(&name) {
            return Err(TaskflowError::DuplicateRegistration(format!("子任务动作 {name}")));
        }
        self.actions.insert(name, action);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SubtaskAction>> {
        self.actions.get(name).cloned()
    }

    pub fn require(&self, name: &str) -> TaskflowResult<Arc<dyn SubtaskAction>> {
        self.get(name).ok_or_else(|| TaskflowError::ActionNotFound {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}

/// 任务模板注册表，名称 → 模板
#[derive(Default, Clone)]
pub struct TemplateRegistry {
    schedules: HashMap<String, Arc<dyn TaskSchedule>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        schedule: Arc<dyn TaskSchedule>,
    ) -> TaskflowResult<()> {
        let name = name.into();
        if self.schedules.contains_key(&name) {
            return Err(TaskflowError::DuplicateRegistration(format!("任务模板 {name}")));
        }
        self.schedules.insert(name, schedule);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskSchedule>> {
        self.schedules.get(name).cloned()
    }

    pub fn require(&self, name: &str) -> TaskflowResult<Arc<dyn TaskSchedule>> {
        self.get(name).ok_or_else(|| TaskflowError::TemplateNotFound {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schedules.contains_key(name)
    }
}
