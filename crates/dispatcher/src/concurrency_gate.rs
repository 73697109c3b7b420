use std::collections::HashMap;

use taskflow_core::TaskflowResult;
use taskflow_domain::entities::{SubtaskInstance, SubtaskState, TaskOperation};
use taskflow_domain::repositories::TaskStore;
use tracing::debug;

/// 并发闸门
///
/// 同一任务内同时处于 READY/RUNNING/CANCELING 的子任务数不超过并发上限（非正数表示不限制），
/// 并且只放行依赖已满足的子任务：
/// - EXECUTE：PENDING 且全部上游 SUCCESSFUL
/// - ROLLBACK：SUCCESSFUL 或 FAILED 且全部下游 PENDING
pub struct ConcurrencyGate;

impl ConcurrencyGate {
    /// 计算本轮可放行的子任务ID，按ID升序
    pub fn admit(operation: TaskOperation, subtasks: &[SubtaskInstance], limit: i32) -> Vec<i64> {
        let active = subtasks.iter().filter(|s| s.state.is_active()).count();
        let remaining = if limit > 0 {
            let limit = limit as usize;
            if active >= limit {
                return Vec::new();
            }
            limit - active
        } else {
            usize::MAX
        };

        let states: HashMap<i64, SubtaskState> =
            subtasks.iter().map(|s| (s.id, s.state)).collect();
        let all_in = |ids: &[i64], wanted: SubtaskState| {
            ids.iter().all(|id| states.get(id) == Some(&wanted))
        };

        let mut admissible: Vec<i64> = subtasks
            .iter()
            .filter(|s| match operation {
                TaskOperation::Execute => {
                    s.state == SubtaskState::Pending
                        && all_in(&s.upstreams, SubtaskState::Successful)
                }
                TaskOperation::Rollback => {
                    matches!(s.state, SubtaskState::Successful | SubtaskState::Failed)
                        && all_in(&s.downstreams, SubtaskState::Pending)
                }
            })
            .map(|s| s.id)
            .collect();
        admissible.sort_unstable();
        admissible.truncate(remaining);
        admissible
    }

    /// 放行前的状态集合，批量更新时用作条件
    pub fn admissible_states(operation: TaskOperation) -> &'static [SubtaskState] {
        match operation {
            TaskOperation::Execute => &[SubtaskState::Pending],
            TaskOperation::Rollback => &[SubtaskState::Successful, SubtaskState::Failed],
        }
    }

    /// 计算并持久化放行结果，返回实际被置为 READY 的数量
    pub async fn apply(
        store: &dyn TaskStore,
        operation: TaskOperation,
        subtasks: &[SubtaskInstance],
        limit: i32,
    ) -> TaskflowResult<u64> {
        let admitted = Self::admit(operation, subtasks, limit);
        if admitted.is_empty() {
            return Ok(0);
        }

        let updated = store
            .update_subtask_states(
                &admitted,
                Self::admissible_states(operation),
                SubtaskState::Ready,
            )
            .await?;
        debug!(
            "并发闸门放行 {:?}，实际更新 {} 个子任务",
            admitted, updated
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, state: SubtaskState, upstreams: &[i64], downstreams: &[i64]) -> SubtaskInstance {
        let mut s = SubtaskInstance::new(1, format!("n{id}"), "noop");
        s.id = id;
        s.state = state;
        s.upstreams = upstreams.to_vec();
        s.downstreams = downstreams.to_vec();
        s
    }

    #[test]
    fn test_execute_admits_roots_up_to_limit() {
        let graph = vec![
            node(3, SubtaskState::Pending, &[], &[]),
            node(1, SubtaskState::Pending, &[], &[4]),
            node(2, SubtaskState::Pending, &[], &[4]),
            node(4, SubtaskState::Pending, &[1, 2], &[]),
        ];
        assert_eq!(ConcurrencyGate::admit(TaskOperation::Execute, &graph, 2), vec![1, 2]);
        assert_eq!(ConcurrencyGate::admit(TaskOperation::Execute, &graph, -1), vec![1, 2, 3]);
        assert_eq!(ConcurrencyGate::admit(TaskOperation::Execute, &graph, 0), vec![1, 2, 3]);
    }

    #[test]
    fn test_execute_waits_for_all_upstreams() {
        let graph = vec![
            node(1, SubtaskState::Successful, &[], &[3]),
            node(2, SubtaskState::Running, &[], &[3]),
            node(3, SubtaskState::Pending, &[1, 2], &[]),
        ];
        assert!(ConcurrencyGate::admit(TaskOperation::Execute, &graph, -1).is_empty());

        let graph = vec![
            node(1, SubtaskState::Successful, &[], &[3]),
            node(2, SubtaskState::Successful, &[], &[3]),
            node(3, SubtaskState::Pending, &[1, 2], &[]),
        ];
        assert_eq!(ConcurrencyGate::admit(TaskOperation::Execute, &graph, -1), vec![3]);
    }

    #[test]
    fn test_active_subtasks_consume_slots() {
        let graph = vec![
            node(1, SubtaskState::Ready, &[], &[]),
            node(2, SubtaskState::Running, &[], &[]),
            node(3, SubtaskState::Pending, &[], &[]),
            node(4, SubtaskState::Pending, &[], &[]),
        ];
        assert!(ConcurrencyGate::admit(TaskOperation::Execute, &graph, 2).is_empty());
        assert_eq!(ConcurrencyGate::admit(TaskOperation::Execute, &graph, 3), vec![3]);
    }

    #[test]
    fn test_canceling_subtask_keeps_its_slot() {
        let graph = vec![
            node(1, SubtaskState::Canceling, &[], &[]),
            node(2, SubtaskState::Pending, &[], &[]),
        ];
        assert!(ConcurrencyGate::admit(TaskOperation::Execute, &graph, 1).is_empty());
        assert_eq!(ConcurrencyGate::admit(TaskOperation::Execute, &graph, 2), vec![2]);
    }

    #[test]
    fn test_rollback_walks_in_reverse() {
        // A -> B，都已成功：先回滚 B
        let graph = vec![
            node(1, SubtaskState::Successful, &[], &[2]),
            node(2, SubtaskState::Successful, &[1], &[]),
        ];
        assert_eq!(ConcurrencyGate::admit(TaskOperation::Rollback, &graph, -1), vec![2]);

        let graph = vec![
            node(1, SubtaskState::Successful, &[], &[2]),
            node(2, SubtaskState::Pending, &[1], &[]),
        ];
        assert_eq!(ConcurrencyGate::admit(TaskOperation::Rollback, &graph, -1), vec![1]);

        // 运行中的下游阻塞回滚
        let graph = vec![
            node(1, SubtaskState::Failed, &[], &[2]),
            node(2, SubtaskState::Running, &[1], &[]),
        ];
        assert!(ConcurrencyGate::admit(TaskOperation::Rollback, &graph, -1).is_empty());
    }

    #[test]
    fn test_rollback_includes_failed_nodes() {
        let graph = vec![
            node(1, SubtaskState::Successful, &[], &[2]),
            node(2, SubtaskState::Failed, &[1], &[3]),
            node(3, SubtaskState::Pending, &[2], &[]),
        ];
        assert_eq!(ConcurrencyGate::admit(TaskOperation::Rollback, &graph, 1), vec![2]);
    }
}
