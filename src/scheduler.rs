//! Priority sort and the three execution strategies (§4.4).
//!
//! New relative to the teacher, which iterates discovered resources in
//! whatever order the tagging API returned them, strictly sequentially, one
//! resource type at a time. Grounded on `futures::future::join_all` for the
//! `parallel` and `grouped-parallel` strategies (`stackabletech-operator-rs`
//! depends on `futures` for the same kind of concurrent-await fan-out) and
//! a plain loop, in the teacher's own style, for `sequential`.

use std::future::Future;

use futures::future::join_all;

use crate::config::ExecutionStrategy;
use crate::model::{Action, DiscoveredResource, HandlerResult};

/// Sort resources for the given action (§4.4): ascending priority on
/// `start`, descending on `stop`, untouched (discovery order) on
/// `status`/`discover`.
///
/// Uses `Vec::sort_by`, which is a stable sort — same-priority resources
/// keep their relative discovery order (Design Notes §9: "If the target
/// language's sort is not stable... use a stable sort").
pub fn sort_for_action(resources: &mut [DiscoveredResource], action: Action) {
    match action {
        Action::Start => resources.sort_by(|a, b| a.priority.cmp(&b.priority)),
        Action::Stop => resources.sort_by(|a, b| b.priority.cmp(&a.priority)),
        Action::Status | Action::Discover => {}
    }
}

/// Partition an already-sorted slice into maximal runs of equal priority
/// (§4.4's "priority group"), preserving each run's relative order.
pub fn group_by_priority(resources: Vec<DiscoveredResource>) -> Vec<Vec<DiscoveredResource>> {
    let mut groups: Vec<Vec<DiscoveredResource>> = Vec::new();
    for resource in resources {
        match groups.last_mut() {
            Some(group) if group[0].priority == resource.priority => group.push(resource),
            _ => groups.push(vec![resource]),
        }
    }
    groups
}

/// Run `op` over every resource under the given strategy, honoring the
/// group-barrier guarantee (§4.4, §5): under `sequential`/`grouped-parallel`
/// no lower-priority-for-this-action group starts until every operation in
/// the previous group has produced a result.
pub async fn execute<F, Fut>(
    mut resources: Vec<DiscoveredResource>,
    action: Action,
    strategy: ExecutionStrategy,
    op: F,
) -> Vec<HandlerResult>
where
    F: Fn(DiscoveredResource) -> Fut + Sync,
    Fut: Future<Output = HandlerResult>,
{
    match strategy {
        ExecutionStrategy::Sequential => {
            sort_for_action(&mut resources, action);
            let mut results = Vec::with_capacity(resources.len());
            for resource in resources {
                results.push(op(resource).await);
            }
            results
        }
        ExecutionStrategy::Parallel => join_all(resources.into_iter().map(op)).await,
        ExecutionStrategy::GroupedParallel => {
            sort_for_action(&mut resources, action);
            let groups = group_by_priority(resources);
            let mut results = Vec::new();
            for group in groups {
                let mut group_results = join_all(group.into_iter().map(&op)).await;
                results.append(&mut group_results);
            }
            results
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Mutex;

    use super::*;
    use crate::model::ResourceType;

    fn resource(priority: u32, id: &str) -> DiscoveredResource {
        DiscoveredResource {
            resource_type: ResourceType::RdsDb,
            arn: format!("arn:aws:rds:us-east-1:123456789012:db:{id}"),
            resource_id: id.to_string(),
            priority,
            group: "default".to_string(),
            tags: Default::default(),
            metadata: Default::default(),
        }
    }

    fn dummy_result(resource: &DiscoveredResource, action: Action) -> HandlerResult {
        HandlerResult {
            success: true,
            action,
            resource_type: resource.resource_type,
            resource_id: resource.resource_id.clone(),
            message: String::new(),
            previous_state: None,
            idempotent: false,
            error: None,
            trigger_source: None,
            region: None,
        }
    }

    #[test]
    fn start_sorts_ascending_by_priority() {
        let mut resources = vec![resource(100, "c"), resource(10, "a"), resource(50, "b")];
        sort_for_action(&mut resources, Action::Start);
        let ids: Vec<&str> = resources.iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn stop_sorts_descending_by_priority() {
        let mut resources = vec![resource(10, "a"), resource(100, "c"), resource(50, "b")];
        sort_for_action(&mut resources, Action::Stop);
        let ids: Vec<&str> = resources.iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
    }

    #[test]
    fn status_preserves_discovery_order() {
        let mut resources = vec![resource(100, "c"), resource(10, "a"), resource(50, "b")];
        sort_for_action(&mut resources, Action::Status);
        let ids: Vec<&str> = resources.iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn grouping_preserves_equal_priority_runs() {
        let resources = vec![resource(10, "a"), resource(10, "b"), resource(50, "c")];
        let groups = group_by_priority(resources);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
    }

    #[tokio::test]
    async fn sequential_visits_resources_in_sorted_stop_order() {
        let resources = vec![resource(10, "a"), resource(50, "b"), resource(100, "c")];
        let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let op_order = order.clone();
        let results = execute(resources, Action::Stop, ExecutionStrategy::Sequential, move |r| {
            let order = op_order.clone();
            async move {
                order.lock().await.push(r.resource_id.clone());
                dummy_result(&r, Action::Stop)
            }
        })
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(*order.lock().await, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn grouped_parallel_barrier_separates_priority_groups() {
        // priorities [10, 10, 50]; starting group 10 must fully complete
        // (including its artificial delay) before group 50's op runs.
        let resources = vec![resource(10, "a"), resource(10, "b"), resource(50, "c")];
        let log: Arc<Mutex<Vec<(String, &'static str)>>> = Arc::new(Mutex::new(Vec::new()));

        let op_log = log.clone();
        let _ = execute(resources, Action::Start, ExecutionStrategy::GroupedParallel, move |r| {
            let log = op_log.clone();
            async move {
                log.lock().await.push((r.resource_id.clone(), "begin"));
                if r.priority == 10 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                log.lock().await.push((r.resource_id.clone(), "end"));
                dummy_result(&r, Action::Start)
            }
        })
        .await;

        let log = log.lock().await;
        let c_begin = log.iter().position(|(id, phase)| id == "c" && *phase == "begin").unwrap();
        let a_end = log.iter().position(|(id, phase)| id == "a" && *phase == "end").unwrap();
        let b_end = log.iter().position(|(id, phase)| id == "b" && *phase == "end").unwrap();
        assert!(c_begin > a_end);
        assert!(c_begin > b_end);
    }

    #[tokio::test]
    async fn fail_fast_is_false_total_matches_input_regardless_of_failures() {
        let resources = vec![resource(10, "a"), resource(50, "b")];
        let results = execute(resources, Action::Stop, ExecutionStrategy::Sequential, |r| async move {
            let mut res = dummy_result(&r, Action::Stop);
            res.success = r.resource_id == "a";
            res
        })
        .await;

        assert_eq!(results.len(), 2);
        let succeeded = results.iter().filter(|r| r.success).count();
        assert_eq!(succeeded, 1);
    }
}
