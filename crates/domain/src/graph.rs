//! 子任务图工具
//!
//! 图结构只以子任务上的 id 集合表达，这里的函数都在一组子任务快照上工作。

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use taskflow_core::{TaskflowError, TaskflowResult};

use crate::entities::SubtaskInstance;

/// Kahn 拓扑排序，同一层内按ID升序，存在环时返回 `CircularDependency`
///
/// 指向集合之外的上游引用会被忽略。
pub fn topological_sort(subtasks: &[SubtaskInstance]) -> TaskflowResult<Vec<i64>> {
    let ids: BTreeSet<i64> = subtasks.iter().map(|s| s.id).collect();
    let mut in_degree: BTreeMap<i64, usize> = BTreeMap::new();
    let mut downstreams: BTreeMap<i64, Vec<i64>> = BTreeMap::new();

    for subtask in subtasks {
        in_degree.entry(subtask.id).or_insert(0);
        for upstream in subtask.upstreams.iter().filter(|u| ids.contains(u)) {
            *in_degree.entry(subtask.id).or_insert(0) += 1;
            downstreams.entry(*upstream).or_default().push(subtask.id);
        }
    }

    let mut queue: VecDeque<i64> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(subtasks.len());

    while let Some(node) = queue.pop_front() {
        order.push(node);
        if let Some(children) = downstreams.get(&node) {
            let mut children = children.clone();
            children.sort_unstable();
            for child in children {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }
    }

    if order.len() < in_degree.len() {
        return Err(TaskflowError::CircularDependency);
    }

    Ok(order)
}

/// 检查上下游关系是否互为镜像
pub fn edges_are_symmetric(subtasks: &[SubtaskInstance]) -> bool {
    let by_id: BTreeMap<i64, &SubtaskInstance> = subtasks.iter().map(|s| (s.id, s)).collect();
    subtasks.iter().all(|s| {
        s.upstreams.iter().all(|u| {
            by_id
                .get(u)
                .map(|up| up.downstreams.contains(&s.id))
                .unwrap_or(false)
        }) && s.downstreams.iter().all(|d| {
            by_id
                .get(d)
                .map(|down| down.upstreams.contains(&s.id))
                .unwrap_or(false)
        })
    })
}
