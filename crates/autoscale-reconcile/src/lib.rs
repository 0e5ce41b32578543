//! Diffs a desired pod multiset against the current fleet.
//!
//! [`Reconciler`] never talks to the network or touches a clock; it is pure
//! accounting over the `pods`/`need_pods` it's handed, plus one call into
//! [`CapacityPlanner::select_existing`] in the normal regime. The offline and
//! normal regimes are genuinely different algorithms (see each method's docs),
//! not two branches of one diff — keep them separate rather than unifying
//! them behind a shared "regime" flag.

#![forbid(unsafe_code)]

use autoscale_planner::CapacityPlanner;
use autoscale_proto::{PostResource, Resource};
use std::collections::HashSet;

/// Operations the Scheduler should dispatch this tick for one resource type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub to_create: Vec<PostResource>,
    pub to_update: Vec<(String, PostResource)>,
    pub to_delete: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

pub struct Reconciler<'a> {
    planner: &'a CapacityPlanner,
}

impl<'a> Reconciler<'a> {
    pub fn new(planner: &'a CapacityPlanner) -> Self {
        Self { planner }
    }

    /// Triggered when the type is currently offline (observed absolute load
    /// exceeds `max_load` on some dimension): prefer fastest recovery over
    /// minimizing churn. Sorts both sides descending by `(cpu, ram)` and
    /// walks them pairwise — exact match skips, a desired size that's `>=`
    /// current on either dimension resizes in place, anything smaller gets a
    /// fresh create (a shrink is never performed by resize in this regime).
    pub fn reconcile_offline(&self, pods: &[Resource], need_pods: &[PostResource]) -> ReconcilePlan {
        let mut pods_sorted: Vec<&Resource> = pods.iter().collect();
        pods_sorted.sort_by(|a, b| b.shape().cmp(&a.shape()));
        let mut needs_sorted: Vec<PostResource> = need_pods.to_vec();
        needs_sorted.sort_by(|a, b| b.shape().cmp(&a.shape()));

        let mut plan = ReconcilePlan::default();
        let mut pi = 0;
        let mut ni = 0;
        while pi < pods_sorted.len() && ni < needs_sorted.len() {
            let pod = pods_sorted[pi];
            let need = needs_sorted[ni];
            if pod.shape() == need.shape() {
                // leave as-is
            } else if need.cpu >= pod.cpu || need.ram >= pod.ram {
                plan.to_update.push((pod.id.clone(), need));
            } else {
                plan.to_create.push(need);
            }
            pi += 1;
            ni += 1;
        }
        plan.to_create.extend(needs_sorted[ni..].iter().copied());
        plan.to_delete.extend(pods_sorted[pi..].iter().map(|p| p.id.clone()));
        plan
    }

    /// First asks [`CapacityPlanner::select_existing`] whether a subset of
    /// the active fleet already covers `need_cpu`/`need_ram`. An empty answer
    /// means "plan from scratch": only missing shapes get created, nothing
    /// is resized or deleted (the existing fleet is left untouched rather
    /// than churned on a solve that couldn't find a retention subset).
    /// Otherwise the retained pods and their shape-matched `need_pods`
    /// entries are removed from both sides, and the remainder is diffed the
    /// same way as the offline regime except mismatches always resize
    /// (never create) — churn here is a last resort, not a first move.
    pub fn reconcile_normal(
        &self,
        pods: &[Resource],
        need_pods: &[PostResource],
        need_cpu: f64,
        need_ram: f64,
        cpu_over: f64,
        ram_over: f64,
    ) -> ReconcilePlan {
        let active: Vec<Resource> = pods.iter().filter(|p| !p.failed).cloned().collect();
        let retained_ids = self.planner.select_existing(&active, need_cpu, need_ram, cpu_over, ram_over);

        if retained_ids.is_empty() {
            let existing_shapes: HashSet<(u64, u64)> = pods.iter().map(Resource::shape).collect();
            let to_create = need_pods
                .iter()
                .filter(|n| !existing_shapes.contains(&n.shape()))
                .copied()
                .collect();
            return ReconcilePlan { to_create, to_update: Vec::new(), to_delete: Vec::new() };
        }

        let retained: HashSet<&str> = retained_ids.iter().map(String::as_str).collect();
        let mut retained_shapes: Vec<(u64, u64)> = pods
            .iter()
            .filter(|p| retained.contains(p.id.as_str()))
            .map(Resource::shape)
            .collect();

        let mut remaining_needs = Vec::new();
        for need in need_pods {
            if let Some(pos) = retained_shapes.iter().position(|&s| s == need.shape()) {
                retained_shapes.remove(pos);
            } else {
                remaining_needs.push(*need);
            }
        }

        let mut working_pods: Vec<&Resource> = pods.iter().filter(|p| !retained.contains(p.id.as_str())).collect();
        working_pods.sort_by(|a, b| b.shape().cmp(&a.shape()));
        remaining_needs.sort_by(|a, b| b.shape().cmp(&a.shape()));

        let mut plan = ReconcilePlan::default();
        let mut pi = 0;
        let mut ni = 0;
        while pi < working_pods.len() && ni < remaining_needs.len() {
            let pod = working_pods[pi];
            let need = remaining_needs[ni];
            if pod.shape() != need.shape() {
                plan.to_update.push((pod.id.clone(), need));
            }
            pi += 1;
            ni += 1;
        }
        plan.to_create.extend(remaining_needs[ni..].iter().copied());
        plan.to_delete.extend(working_pods[pi..].iter().map(|p| p.id.clone()));
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscale_proto::ResourceType;

    fn pod(id: &str, cpu: u64, ram: u64) -> Resource {
        Resource {
            id: id.to_string(),
            cost: 10,
            cpu,
            ram,
            cpu_load: 50.0,
            ram_load: 50.0,
            failed: false,
            failed_until: None,
            kind: ResourceType::Vm,
        }
    }

    fn need(cpu: u64, ram: u64) -> PostResource {
        PostResource::new(cpu, ram, ResourceType::Vm)
    }

    #[test]
    fn offline_exact_match_is_left_alone() {
        let planner = CapacityPlanner::default();
        let r = Reconciler::new(&planner);
        let pods = vec![pod("a", 2, 4)];
        let need_pods = vec![need(2, 4)];
        let plan = r.reconcile_offline(&pods, &need_pods);
        assert!(plan.is_empty());
    }

    #[test]
    fn offline_bigger_desired_resizes() {
        let planner = CapacityPlanner::default();
        let r = Reconciler::new(&planner);
        let pods = vec![pod("a", 2, 4)];
        let need_pods = vec![need(4, 4)];
        let plan = r.reconcile_offline(&pods, &need_pods);
        assert_eq!(plan.to_update, vec![("a".to_string(), need(4, 4))]);
        assert!(plan.to_create.is_empty());
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn offline_smaller_desired_creates_instead_of_shrinking() {
        let planner = CapacityPlanner::default();
        let r = Reconciler::new(&planner);
        let pods = vec![pod("a", 4, 4)];
        let need_pods = vec![need(2, 2)];
        let plan = r.reconcile_offline(&pods, &need_pods);
        assert_eq!(plan.to_create, vec![need(2, 2)]);
        assert_eq!(plan.to_delete, vec!["a".to_string()]);
    }

    #[test]
    fn offline_surplus_pods_are_deleted_surplus_needs_are_created() {
        let planner = CapacityPlanner::default();
        let r = Reconciler::new(&planner);
        let pods = vec![pod("a", 4, 4), pod("b", 4, 4)];
        let need_pods = vec![need(4, 4)];
        let plan = r.reconcile_offline(&pods, &need_pods);
        assert!(plan.to_update.is_empty());
        assert!(plan.to_create.is_empty());
        assert_eq!(plan.to_delete, vec!["b".to_string()]);
    }

    #[test]
    fn normal_identical_multiset_is_a_no_op() {
        let planner = CapacityPlanner::default();
        let r = Reconciler::new(&planner);
        let pods = vec![pod("a", 2, 4), pod("b", 2, 4)];
        let need_pods = vec![need(2, 4), need(2, 4)];
        let plan = r.reconcile_normal(&pods, &need_pods, 4.0, 8.0, 0.0, 0.0);
        assert!(plan.is_empty());
    }

    #[test]
    fn normal_infeasible_retention_creates_only_missing_shapes() {
        let planner = CapacityPlanner::default();
        let r = Reconciler::new(&planner);
        let pods = vec![pod("a", 1, 1)];
        let need_pods = vec![need(1, 1), need(4, 4)];
        // need_cpu/ram impossible for a single 1-cpu pod to satisfy -> select_existing empty.
        let plan = r.reconcile_normal(&pods, &need_pods, 100.0, 100.0, 0.0, 0.0);
        assert_eq!(plan.to_create, vec![need(4, 4)]);
        assert!(plan.to_update.is_empty());
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn normal_retains_enough_pods_and_deletes_the_rest() {
        let planner = CapacityPlanner::default();
        let r = Reconciler::new(&planner);
        let pods = vec![pod("a", 2, 4), pod("b", 2, 4), pod("c", 2, 4)];
        let need_pods = vec![need(2, 4), need(2, 4)];
        let plan = r.reconcile_normal(&pods, &need_pods, 4.0, 8.0, 0.0, 0.0);
        assert_eq!(plan.to_delete.len(), 1);
        assert!(plan.to_create.is_empty());
        assert!(plan.to_update.is_empty());
    }
}
