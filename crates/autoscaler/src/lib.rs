//! The Scheduler: drives one tick of the autoscaling control loop.
//!
//! `tick()` is the only entry point a caller needs: fetch prices, record a
//! stat sample, refit the forecast, fetch the fleet, bootstrap an empty fleet
//! or plan-and-reconcile each resource type, then trim the load trails. See
//! [`Scheduler::run`] for the outer sleep-and-retry loop.

#![forbid(unsafe_code)]

use autoscale_client::{build_client, ClientError, PriceClient, ResourceClient, StatClient};
use autoscale_config::Settings;
use autoscale_forecast::Forecaster;
use autoscale_persist::JsonHistoryStore;
use autoscale_planner::CapacityPlanner;
use autoscale_proto::{LoadTrail, Price, PostResource, Resource, ResourceType, trailing_mean_excluding_last};
use autoscale_reconcile::{ReconcilePlan, Reconciler};
use autoscale_stats::StatStore;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("remote API call failed")]
    Client(#[from] ClientError),
    #[error("one or more mutations failed this tick")]
    Dispatch,
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

pub struct Scheduler {
    settings: Settings,
    prices: PriceClient,
    resources: ResourceClient,
    stats: StatClient,
    store: StatStore,
    forecaster: Forecaster,
    planner: CapacityPlanner,
    trails: HashMap<ResourceType, LoadTrail>,
}

impl Scheduler {
    pub fn new(settings: Settings) -> Self {
        let client = build_client(settings.request_timeout_secs);
        let prices = PriceClient::new(client.clone(), settings.host.clone());
        let resources = ResourceClient::new(client.clone(), settings.host.clone(), settings.token.clone());
        let stats = StatClient::new(client, settings.host.clone(), settings.token.clone());

        // Persistence is enabled only outside production, per this document's
        // configuration contract (§6/§9) — prod runs never touch local disk state.
        let persistence = if settings.prod {
            None
        } else {
            Some(JsonHistoryStore::new("memory.json"))
        };

        let store = StatStore::new(settings.memory_size, settings.penalty, persistence);
        let forecaster = Forecaster::new(settings.min_memory_size);
        let planner = CapacityPlanner::new(settings.penalty);

        let mut trails = HashMap::new();
        for t in ResourceType::ALL {
            trails.insert(t, LoadTrail::default());
        }

        Self { settings, prices, resources, stats, store, forecaster, planner, trails }
    }

    /// The outer loop: tick, sleep, repeat. Any tick-level error is logged and
    /// swallowed — there is no in-tick retry, only a sleep before the next one.
    pub async fn run(&mut self) -> ! {
        loop {
            if let Err(e) = self.tick().await {
                error!(error = %e, "tick failed");
            }
            tokio::time::sleep(std::time::Duration::from_secs(self.settings.sleep_second)).await;
        }
    }

    pub async fn tick(&mut self) -> SchedulerResult<()> {
        let start = Instant::now();
        info!("tick start");

        let prices = self.prices.grouped().await?;

        if let Some(stat) = self.stats.get().await {
            self.store.record(stat, &prices);
        }

        let series = self.store.requests_history(self.settings.train_size);
        self.forecaster.refit(self.store.len(), &series);

        let current = self.resources.list().await?;

        if current.is_empty() {
            self.bootstrap(&prices).await?;
            info!(elapsed = ?start.elapsed(), "tick end (bootstrap)");
            return Ok(());
        }

        for t in ResourceType::ALL {
            self.plan_and_reconcile(t, &current, &prices).await?;
        }

        for trail in self.trails.values_mut() {
            trail.trim(self.settings.max_data_size);
        }

        info!(elapsed = ?start.elapsed(), "tick end");
        Ok(())
    }

    /// `pmin`/`pmax` by cost; provisions `max(1, round(pmax.cost/pmin.cost) - 1)`
    /// pods of the cheapest size. A type with no offered prices is skipped.
    async fn bootstrap(&self, prices: &HashMap<ResourceType, Vec<Price>>) -> SchedulerResult<()> {
        for t in ResourceType::ALL {
            let Some(list) = prices.get(&t) else { continue };
            if list.is_empty() {
                continue;
            }
            let pmin = list.iter().min_by_key(|p| p.cost).expect("non-empty");
            let pmax = list.iter().max_by_key(|p| p.cost).expect("non-empty");
            let count = bootstrap_count(pmin.cost, pmax.cost);
            info!(%t, count, pmin_cost = pmin.cost, pmax_cost = pmax.cost, "bootstrapping empty fleet");

            let post = PostResource::from(pmin);
            let futures: Vec<_> = (0..count).map(|_| self.resources.create(&post)).collect();

            if !self.settings.prod {
                debug!(%t, ops = futures.len(), "non-prod: bootstrap dispatch constructed but not awaited");
                continue;
            }

            let results = futures_util::future::join_all(futures).await;
            let mut failed = false;
            for r in results {
                if let Err(e) = r {
                    error!(error = %e, %t, "bootstrap create failed");
                    failed = true;
                }
            }
            if failed {
                return Err(SchedulerError::Dispatch);
            }
        }
        Ok(())
    }

    async fn plan_and_reconcile(
        &mut self,
        t: ResourceType,
        current: &[Resource],
        prices: &HashMap<ResourceType, Vec<Price>>,
    ) -> SchedulerResult<()> {
        let type_pods: Vec<Resource> = current.iter().filter(|p| p.kind == t).cloned().collect();
        let active: Vec<Resource> = type_pods.iter().filter(|p| !p.failed).cloned().collect();

        let (cpu_over, ram_over) = self.store.overhead(t);
        let (cpu_req, ram_req) = self.store.per_request(t);

        let (abs_cpu, abs_ram) = absolute_load(&active, cpu_over, ram_over);
        let is_offline = any_pod_over_load(&active, self.settings.max_load);

        let trail = self.trails.entry(t).or_default();
        trail.push(abs_cpu, abs_ram);

        if !dampening_pass(trail, self.settings.gap, self.settings.delta) {
            debug!(%t, "dampening skip: reading looks like noise");
            return Ok(());
        }

        let prices_t = prices.get(&t).map(Vec::as_slice).unwrap_or(&[]);
        let pod_load_max_percent = self.settings.pod_load_max_percent();

        let predictive = if self.store.is_fit() && self.forecaster.has_forecast() {
            self.best_predictive_candidate(prices_t, cpu_req, ram_req, cpu_over, ram_over, abs_cpu, abs_ram, pod_load_max_percent)
        } else {
            None
        };

        let (need_cpu, need_ram, need_pods) = match predictive {
            Some(candidate) => candidate,
            None => {
                if self.store.len() >= self.settings.min_memory_size {
                    debug!(%t, "no predictive candidate accepted and history is long: skipping tick for this type");
                    return Ok(());
                }
                let need_cpu = abs_cpu / pod_load_max_percent;
                let need_ram = abs_ram / pod_load_max_percent;
                let need_pods = self.planner.plan(prices_t, need_cpu, need_ram, cpu_over, ram_over);
                (need_cpu, need_ram, need_pods)
            }
        };

        if need_pods.is_empty() {
            debug!(%t, "empty demand plan, skipping");
            return Ok(());
        }
        let need_posts: Vec<PostResource> = need_pods.iter().map(PostResource::from).collect();

        let reconciler = Reconciler::new(&self.planner);
        let plan = if is_offline {
            info!(%t, "offline regime");
            reconciler.reconcile_offline(&type_pods, &need_posts)
        } else {
            info!(%t, "normal regime");
            reconciler.reconcile_normal(&active, &need_posts, need_cpu, need_ram, cpu_over, ram_over)
        };

        self.dispatch_plan(plan).await
    }

    /// Iterates the forecast's 6 horizon points in order; the **last**
    /// accepted one wins (overwriting any earlier acceptance), not the first.
    #[allow(clippy::too_many_arguments)]
    fn best_predictive_candidate(
        &self,
        prices_t: &[Price],
        cpu_req: f64,
        ram_req: f64,
        cpu_over: f64,
        ram_over: f64,
        abs_cpu: f64,
        abs_ram: f64,
        pod_load_max_percent: f64,
    ) -> Option<(f64, f64, Vec<Price>)> {
        let mut accepted = None;
        for &requests in self.forecaster.forecast() {
            if requests <= 0 {
                continue;
            }
            let requests = requests as f64;
            let plan = self.planner.plan_optimal(
                prices_t, requests, cpu_req, ram_req, cpu_over, ram_over, pod_load_max_percent,
            );
            if plan.is_empty() {
                continue;
            }
            let cap_cpu = scaled_capacity(&plan, pod_load_max_percent, cpu_over, |p| p.cpu);
            let cap_ram = scaled_capacity(&plan, pod_load_max_percent, ram_over, |p| p.ram);
            if cap_cpu > abs_cpu && cap_ram > abs_ram {
                // need_cpu/need_ram feed reconcile_normal -> select_existing as the
                // retention target; record the plan's own overhead-adjusted capacity
                // (unscaled by pod_load_max_percent), not the raw request demand.
                let plan_cpu = plan_capacity(&plan, cpu_over, |p| p.cpu);
                let plan_ram = plan_capacity(&plan, ram_over, |p| p.ram);
                accepted = Some((plan_cpu, plan_ram, plan));
            }
        }
        accepted
    }

    async fn dispatch_plan(&self, plan: ReconcilePlan) -> SchedulerResult<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let creates = plan.to_create.iter().map(|post| self.resources.create(post));
        let updates = plan.to_update.iter().map(|(id, post)| self.resources.update(id, post));
        let deletes = plan.to_delete.iter().map(|id| self.resources.delete(id));

        if !self.settings.prod {
            let count = plan.to_create.len() + plan.to_update.len() + plan.to_delete.len();
            debug!(ops = count, "non-prod: dispatch constructed but not awaited");
            return Ok(());
        }

        let create_results = futures_util::future::join_all(creates).await;
        let update_results = futures_util::future::join_all(updates).await;
        let delete_results = futures_util::future::join_all(deletes).await;

        let mut failed = false;
        for r in create_results.into_iter().chain(update_results).chain(delete_results) {
            if let Err(e) = r {
                error!(error = %e, "mutation failed");
                failed = true;
            }
        }
        if failed {
            return Err(SchedulerError::Dispatch);
        }
        Ok(())
    }

}

/// `max(1, round(pmax_cost / pmin_cost) - 1)`. A free (zero-cost) cheapest
/// price is treated as a ratio of 1 (provision the floor of one pod).
fn bootstrap_count(pmin_cost: u64, pmax_cost: u64) -> usize {
    if pmin_cost == 0 {
        return 1;
    }
    let ratio = pmax_cost as f64 / pmin_cost as f64;
    ((ratio.round() as i64) - 1).max(1) as usize
}

/// `Σ (pod.cpu · pod.cpu_load) / 100 − |active| · cpu_over`, likewise RAM.
fn absolute_load(active: &[Resource], cpu_over: f64, ram_over: f64) -> (f64, f64) {
    let cpu: f64 = active.iter().map(|p| p.cpu as f64 * p.cpu_load).sum::<f64>() / 100.0
        - active.len() as f64 * cpu_over;
    let ram: f64 = active.iter().map(|p| p.ram as f64 * p.ram_load).sum::<f64>() / 100.0
        - active.len() as f64 * ram_over;
    (cpu, ram)
}

/// Offline trigger: the fleet-wide `Σ(pod.cpu · pod.cpu_load)` (no `/100`,
/// no overhead subtracted — the same aggregate step 1 of §4.5 names, not the
/// `/100`-scaled `absolute_load` used for the load trail) meets or exceeds
/// `max_load` on either axis.
fn any_pod_over_load(active: &[Resource], max_load: f64) -> bool {
    let cpu_load: f64 = active.iter().map(|p| p.cpu as f64 * p.cpu_load).sum();
    let ram_load: f64 = active.iter().map(|p| p.ram as f64 * p.ram_load).sum();
    cpu_load >= max_load || ram_load >= max_load
}

/// `true` means "proceed" (not noise); `false` means "skip this tick". Fewer
/// than 4 entries in either trail always passes.
fn dampening_pass(trail: &LoadTrail, gap: usize, delta: f64) -> bool {
    if trail.cpu.len() < 4 || trail.ram.len() < 4 {
        return true;
    }
    let cpu_ok = relative_diff(&trail.cpu, gap).map(|d| d < delta).unwrap_or(true);
    let ram_ok = relative_diff(&trail.ram, gap).map(|d| d < delta).unwrap_or(true);
    cpu_ok && ram_ok
}

fn relative_diff(series: &[f64], gap: usize) -> Option<f64> {
    let avg = trailing_mean_excluding_last(series, gap)?.max(0.1);
    let current = *series.last()?;
    Some((avg - current).abs() / avg)
}

fn scaled_capacity(plan: &[Price], load_ceiling: f64, over: f64, field: impl Fn(&Price) -> u64) -> f64 {
    let sum: f64 = plan.iter().map(|p| load_ceiling * field(p) as f64).sum();
    sum - plan.len() as f64 * over
}

/// `Σ field(p) − |plan| · over` — the plan's raw overhead-adjusted capacity,
/// unscaled by the pod load ceiling (as distinct from `scaled_capacity`,
/// which is what the acceptance test compares against `abs_load`).
fn plan_capacity(plan: &[Price], over: f64, field: impl Fn(&Price) -> u64) -> f64 {
    let sum: f64 = plan.iter().map(|p| field(p) as f64).sum();
    sum - plan.len() as f64 * over
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscale_proto::ResourceType;

    fn pod(cpu: u64, ram: u64, cpu_load: f64, ram_load: f64) -> Resource {
        Resource {
            id: "p".to_string(),
            cost: 10,
            cpu,
            ram,
            cpu_load,
            ram_load,
            failed: false,
            failed_until: None,
            kind: ResourceType::Vm,
        }
    }

    #[test]
    fn bootstrap_count_matches_scenario_one() {
        // small {cost=10}, big {cost=40} -> round(40/10) - 1 = 3
        assert_eq!(bootstrap_count(10, 40), 3);
    }

    #[test]
    fn bootstrap_count_never_goes_below_one() {
        assert_eq!(bootstrap_count(10, 10), 1);
        assert_eq!(bootstrap_count(10, 11), 1);
    }

    #[test]
    fn bootstrap_count_handles_zero_cost_floor() {
        assert_eq!(bootstrap_count(0, 40), 1);
    }

    #[test]
    fn single_pod_over_max_load_triggers_offline() {
        let pods = vec![pod(1, 2, 99.0, 10.0)];
        assert!(any_pod_over_load(&pods, 95.0));
    }

    #[test]
    fn pods_under_max_load_do_not_trigger_offline() {
        let pods = vec![pod(1, 1, 50.0, 50.0)];
        assert!(!any_pod_over_load(&pods, 95.0));
    }

    #[test]
    fn aggregate_load_across_pods_triggers_offline_even_when_no_single_pod_is_saturated() {
        // Two 1-cpu pods at 50% each: no pod is individually over max_load, but
        // the fleet-wide Σ(cpu · cpu_load) = 100 >= max_load, so this is offline.
        let pods = vec![pod(1, 1, 50.0, 10.0), pod(1, 1, 50.0, 10.0)];
        assert!(any_pod_over_load(&pods, 95.0));
    }

    #[test]
    fn dampening_always_passes_below_four_entries() {
        let mut trail = LoadTrail::default();
        trail.push(100.0, 100.0);
        trail.push(100.0, 100.0);
        trail.push(100.0, 100.0);
        assert!(dampening_pass(&trail, 4, 0.2));
    }

    #[test]
    fn dampening_proceeds_on_a_stable_reading() {
        let mut trail = LoadTrail::default();
        for _ in 0..5 {
            trail.push(100.0, 100.0);
        }
        assert!(dampening_pass(&trail, 4, 0.2));
    }

    #[test]
    fn dampening_skips_on_a_large_jump() {
        let mut trail = LoadTrail::default();
        for _ in 0..4 {
            trail.push(10.0, 10.0);
        }
        trail.push(1000.0, 1000.0);
        assert!(!dampening_pass(&trail, 4, 0.2));
    }

    #[test]
    fn absolute_load_subtracts_per_pod_overhead() {
        let pods = vec![pod(10, 20, 50.0, 50.0)];
        let (cpu, ram) = absolute_load(&pods, 0.5, 1.0);
        assert_eq!(cpu, 10.0 * 50.0 / 100.0 - 0.5);
        assert_eq!(ram, 20.0 * 50.0 / 100.0 - 1.0);
    }
}
