//! 任务模板：DAG 蓝图与初始参数
//!
//! 模板由命名的子任务规格和它们之间的上下游连线组成。物化时每个规格生成一个子任务，
//! 带有扇出并行度的规格生成多个子任务（`parallel_idx` 为 0..n-1），连线在两端的所有
//! 实例之间展开。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use taskflow_core::{TaskflowError, TaskflowResult};

use crate::context::TaskContext;
use crate::entities::SubtaskInstance;
use crate::graph::topological_sort;
use crate::registry::ActionRegistry;

/// 物化任务时使用的初始参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Argument {
    pub context: TaskContext,
    /// 同时处于 READY/RUNNING 的子任务上限，-1 表示不限制
    pub concurrency: i32,
    pub prohibit_rollback: bool,
    pub tenant_id: Option<i64>,
}

impl Default for Argument {
    fn default() -> Self {
        Self {
            context: TaskContext::new(),
            concurrency: -1,
            prohibit_rollback: false,
            tenant_id: None,
        }
    }
}

impl Argument {
    pub fn with_concurrency(mut self, concurrency: i32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    pub fn prohibit_rollback(mut self) -> Self {
        self.prohibit_rollback = true;
        self
    }
}

/// 单个子任务规格
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub name: String,
    pub action: String,
    /// 扇出并行度，`None` 表示普通节点
    pub parallelism: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub name: String,
    pub subtasks: Vec<SubtaskSpec>,
    /// (上游, 下游) 规格名称对
    pub edges: Vec<(String, String)>,
}

impl TaskTemplate {
    pub fn builder(name: impl Into<String>) -> TaskTemplateBuilder {
        TaskTemplateBuilder {
            template: TaskTemplate {
                name: name.into(),
                subtasks: Vec::new(),
                edges: Vec::new(),
            },
        }
    }

    /// 按参数生成子任务图
    ///
    /// 返回的子任务 `id` 是临时编号（在返回向量中的下标），`upstreams`/`downstreams`
    /// 引用同一套编号，保存时由存储层重映射。重试预算和超时取自动作定义。
    pub fn generate_subtasks(
        &self,
        argument: &Argument,
        actions: &ActionRegistry,
    ) -> TaskflowResult<Vec<SubtaskInstance>> {
        if self.subtasks.is_empty() {
            return Err(TaskflowError::InvalidTemplate(format!(
                "模板 {} 不包含任何子任务",
                self.name
            )));
        }

        let mut instances = Vec::new();
        let mut by_spec: BTreeMap<&str, Vec<usize>> = BTreeMap::new();

        for spec in &self.subtasks {
            if by_spec.contains_key(spec.name.as_str()) {
                return Err(TaskflowError::InvalidTemplate(format!(
                    "模板 {} 中子任务名称重复: {}",
                    self.name, spec.name
                )));
            }
            let action = actions.require(&spec.action)?;

            let parallel: Vec<i32> = match spec.parallelism {
                Some(0) => {
                    return Err(TaskflowError::InvalidTemplate(format!(
                        "子任务 {} 的并行度必须大于0",
                        spec.name
                    )))
                }
                Some(n) => (0..n as i32).collect(),
                None => vec![-1],
            };

            let mut indexes = Vec::with_capacity(parallel.len());
            for parallel_idx in parallel {
                let index = instances.len();
                let mut subtask = SubtaskInstance::new(0, spec.name.clone(), spec.action.clone());
                subtask.id = index as i64;
                subtask.retry_count = action.retry_count().max(0);
                subtask.timeout_seconds = action.timeout_seconds();
                subtask.parallel_idx = parallel_idx;
                subtask.context = argument.context.clone();
                instances.push(subtask);
                indexes.push(index);
            }
            by_spec.insert(spec.name.as_str(), indexes);
        }

        let mut seen = BTreeSet::new();
        for (upstream, downstream) in &self.edges {
            if upstream == downstream {
                return Err(TaskflowError::CircularDependency);
            }
            if !seen.insert((upstream.as_str(), downstream.as_str())) {
                continue;
            }
            let ups = by_spec.get(upstream.as_str()).ok_or_else(|| {
                TaskflowError::InvalidTemplate(format!("连线引用了未知的子任务: {upstream}"))
            })?;
            let downs = by_spec.get(downstream.as_str()).ok_or_else(|| {
                TaskflowError::InvalidTemplate(format!("连线引用了未知的子任务: {downstream}"))
            })?;
            for &u in ups {
                for &d in downs {
                    instances[u].downstreams.push(d as i64);
                    instances[d].upstreams.push(u as i64);
                }
            }
        }

        topological_sort(&instances)?;

        Ok(instances)
    }
}

pub struct TaskTemplateBuilder {
    template: TaskTemplate,
}

impl TaskTemplateBuilder {
    pub fn subtask(mut self, name: impl Into<String>, action: impl Into<String>) -> Self {
        self.template.subtasks.push(SubtaskSpec {
            name: name.into(),
            action: action.into(),
            parallelism: None,
        });
        self
    }

    /// 扇出节点：生成 `parallelism` 个并行实例
    pub fn parallel_subtask(
        mut self,
        name: impl Into<String>,
        action: impl Into<String>,
        parallelism: usize,
    ) -> Self {
        self.template.subtasks.push(SubtaskSpec {
            name: name.into(),
            action: action.into(),
            parallelism: Some(parallelism),
        });
        self
    }

    pub fn edge(mut self, upstream: impl Into<String>, downstream: impl Into<String>) -> Self {
        self.template
            .edges
            .push((upstream.into(), downstream.into()));
        self
    }

    /// 把给定名称依次串成一条链
    pub fn chain(mut self, names: &[&str]) -> Self {
        for pair in names.windows(2) {
            self.template
                .edges
                .push((pair[0].to_string(), pair[1].to_string()));
        }
        self
    }

    pub fn build(self) -> TaskTemplate {
        self.template
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{SubtaskAction, SubtaskContext};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Step {
        name: &'static str,
        retries: i32,
    }

    #[async_trait]
    impl SubtaskAction for Step {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, ctx: SubtaskContext) -> TaskflowResult<TaskContext> {
            Ok(ctx.context)
        }

        fn retry_count(&self) -> i32 {
            self.retries
        }

        fn timeout_seconds(&self) -> i64 {
            30
        }
    }

    fn registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry
            .register(Arc::new(Step {
                name: "prepare",
                retries: 2,
            }))
            .unwrap();
        registry
            .register(Arc::new(Step {
                name: "apply",
                retries: 0,
            }))
            .unwrap();
        registry
    }

    #[test]
    fn test_chain_generation() {
        let template = TaskTemplate::builder("upgrade")
            .subtask("A", "prepare")
            .subtask("B", "apply")
            .subtask("C", "apply")
            .chain(&["A", "B", "C"])
            .build();

        let argument = Argument::default().with_context(TaskContext::new().with("cluster", "c1"));
        let subtasks = template.generate_subtasks(&argument, &registry()).unwrap();

        assert_eq!(subtasks.len(), 3);
        assert_eq!(subtasks[0].upstreams, Vec::<i64>::new());
        assert_eq!(subtasks[0].downstreams, vec![1]);
        assert_eq!(subtasks[1].upstreams, vec![0]);
        assert_eq!(subtasks[2].upstreams, vec![1]);
        assert_eq!(subtasks[0].retry_count, 2);
        assert_eq!(subtasks[0].timeout_seconds, 30);
        assert_eq!(subtasks[2].context.get_str("cluster"), Some("c1"));
        assert!(subtasks.iter().all(|s| s.parallel_idx == -1));
    }

    #[test]
    fn test_fan_out_expands_edges() {
        let template = TaskTemplate::builder("scale")
            .subtask("prepare", "prepare")
            .parallel_subtask("apply", "apply", 3)
            .subtask("finish", "prepare")
            .chain(&["prepare", "apply", "finish"])
            .build();

        let subtasks = template
            .generate_subtasks(&Argument::default(), &registry())
            .unwrap();

        assert_eq!(subtasks.len(), 5);
        let fan: Vec<_> = subtasks.iter().filter(|s| s.name == "apply").collect();
        assert_eq!(
            fan.iter().map(|s| s.parallel_idx).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(subtasks[0].downstreams, vec![1, 2, 3]);
        assert_eq!(subtasks[4].upstreams, vec![1, 2, 3]);
    }

    #[test]
    fn test_invalid_templates() {
        let cyclic = TaskTemplate::builder("cyclic")
            .subtask("A", "prepare")
            .subtask("B", "apply")
            .edge("A", "B")
            .edge("B", "A")
            .build();
        assert!(matches!(
            cyclic.generate_subtasks(&Argument::default(), &registry()),
            Err(TaskflowError::CircularDependency)
        ));

        let unknown_action = TaskTemplate::builder("x").subtask("A", "missing").build();
        assert!(matches!(
            unknown_action.generate_subtasks(&Argument::default(), &registry()),
            Err(TaskflowError::ActionNotFound { .. })
        ));

        let unknown_edge = TaskTemplate::builder("x")
            .subtask("A", "prepare")
            .edge("A", "Z")
            .build();
        assert!(matches!(
            unknown_edge.generate_subtasks(&Argument::default(), &registry()),
            Err(TaskflowError::InvalidTemplate(_))
        ));

        let empty = TaskTemplate::builder("empty").build();
        assert!(empty
            .generate_subtasks(&Argument::default(), &registry())
            .is_err());
    }
}
