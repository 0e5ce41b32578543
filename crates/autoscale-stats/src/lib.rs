//! Rolling history of load samples, the per-pod overhead estimator, and the
//! (optional) on-disk persistence hook.
//!
//! [`StatStore`] owns an insertion-ordered `{timestamp -> Stat}` map bounded
//! to `memory_size` entries, evicting the eldest on overflow. Every
//! [`StatStore::record`] call also attempts to refit the [`OverheadModel`]
//! from the last two observations — see [`StatStore`]'s docs for the fit's
//! failure modes.

#![forbid(unsafe_code)]

use autoscale_persist::JsonHistoryStore;
use autoscale_planner::CapacityPlanner;
use autoscale_proto::{Dimension, OverheadModel, Price, ResourceType, Stat};
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Rolling history of [`Stat`] samples plus the fitted [`OverheadModel`].
pub struct StatStore {
    memory_size: usize,
    history: IndexMap<i64, Stat>,
    model: OverheadModel,
    planner: CapacityPlanner,
    persistence: Option<JsonHistoryStore>,
}

impl StatStore {
    /// `persistence`, when set, seeds the in-memory history from disk on
    /// construction and re-snapshots it on every successful `record`.
    pub fn new(memory_size: usize, penalty: f64, persistence: Option<JsonHistoryStore>) -> Self {
        let history = persistence
            .as_ref()
            .map(|store| store.load::<i64, Stat>())
            .unwrap_or_default();
        debug!(count = history.len(), "loaded stat history");
        Self {
            memory_size,
            history,
            model: OverheadModel::default(),
            planner: CapacityPlanner::new(penalty),
            persistence,
        }
    }

    /// Insert `stat` keyed by its timestamp (duplicate timestamps replace
    /// in place), evict the eldest entry if `memory_size` is exceeded, then
    /// refit the overhead model. `prices` must carry the full, type-grouped
    /// offered price list for this tick.
    pub fn record(&mut self, stat: Stat, prices: &HashMap<ResourceType, Vec<Price>>) {
        let key = stat.timestamp.timestamp();
        self.history.insert(key, stat);
        if self.history.len() > self.memory_size {
            self.history.shift_remove_index(0);
        }
        self.fit_overhead(prices);
        self.persist();
    }

    fn persist(&self) {
        if let Some(store) = &self.persistence {
            if let Err(e) = store.save(&self.history) {
                warn!(error = %e, path = %store.path().display(), "failed to persist stat history");
            }
        }
    }

    pub fn last(&self) -> Option<&Stat> {
        self.history.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// `(cpu_overhead, ram_overhead)` currently fitted for `t`.
    pub fn overhead(&self, t: ResourceType) -> (f64, f64) {
        self.model.overhead(t)
    }

    /// `(cpu_per_request, ram_per_request)` currently fitted for `t`.
    pub fn per_request(&self, t: ResourceType) -> (f64, f64) {
        self.model.per_request(t)
    }

    pub fn is_fit(&self) -> bool {
        self.model.is_overhead_calc
    }

    /// The last `n` samples, oldest first.
    pub fn history(&self, n: usize) -> Vec<Stat> {
        let len = self.history.len();
        let start = len.saturating_sub(n);
        self.history.values().skip(start).cloned().collect()
    }

    /// The `requests` field of the last `n` samples, oldest first — the
    /// series the forecaster trains on.
    pub fn requests_history(&self, n: usize) -> Vec<f64> {
        self.history(n).iter().map(|s| s.requests).collect()
    }

    /// Cheapest multiset of `prices` covering `request_count` requests of
    /// type `t`, using the currently fitted overhead and per-request cost.
    pub fn plan_demand(&self, prices: &[Price], t: ResourceType, request_count: f64) -> Vec<Price> {
        let (cpu_over, ram_over) = self.model.overhead(t);
        let (cpu_req, ram_req) = self.model.per_request(t);
        self.planner.plan(
            prices,
            request_count * cpu_req,
            request_count * ram_req,
            cpu_over,
            ram_over,
        )
    }

    /// Requires >= 2 records. Aborts (model unchanged except `is_overhead_calc`
    /// clearing) if any load field of the last two samples is zero. Otherwise
    /// solves a 2x2 linear system per dimension and, only if every coefficient
    /// across all four dimensions is non-negative, commits the fit atomically.
    fn fit_overhead(&mut self, prices: &HashMap<ResourceType, Vec<Price>>) {
        if self.history.len() < 2 {
            return;
        }
        let mut recent = self.history.values().rev();
        let s1 = recent.next().expect("len >= 2").clone();
        let s2 = recent.next().expect("len >= 2").clone();

        if s1.load_fields().iter().any(|&v| v == 0.0) || s2.load_fields().iter().any(|&v| v == 0.0) {
            self.model.is_overhead_calc = false;
            return;
        }

        let mut plan_counts: HashMap<ResourceType, (f64, f64)> = HashMap::new();
        for t in ResourceType::ALL {
            let prices_t = prices.get(&t).map(Vec::as_slice).unwrap_or(&[]);
            let (c1, r1) = s1.type_capacity(t);
            let (c2, r2) = s2.type_capacity(t);
            let n1 = self.planner.plan(prices_t, c1, r1, 0.0, 0.0).len() as f64;
            let n2 = self.planner.plan(prices_t, c2, r2, 0.0, 0.0).len() as f64;
            plan_counts.insert(t, (n1, n2));
        }

        let mut fitted = Vec::with_capacity(Dimension::ALL.len());
        for dim in Dimension::ALL {
            let (n1, n2) = plan_counts[&dim.resource_type()];
            let b1 = s1.capacity(dim) * s1.load_pct(dim) / 100.0;
            let b2 = s2.capacity(dim) * s2.load_pct(dim) / 100.0;

            match solve_2x2(n1, s1.requests, n2, s2.requests, b1, b2) {
                Some((over, per_request)) => fitted.push((dim, over, per_request)),
                None => return, // singular system: leave model untouched
            }
        }

        if fitted.iter().any(|&(_, over, per_request)| over < 0.0 || per_request < 0.0) {
            return; // negative coefficient: discard all four, leave model untouched
        }

        for (dim, over, per_request) in fitted {
            self.model.set_dimension(dim, over, per_request);
        }
        self.model.is_overhead_calc = true;
    }
}

/// Solves `[[n1, r1], [n2, r2]] * [over, per_request]^T = [b1, b2]^T`.
/// Returns `None` for a (near-)singular system.
fn solve_2x2(n1: f64, r1: f64, n2: f64, r2: f64, b1: f64, b2: f64) -> Option<(f64, f64)> {
    let det = n1 * r2 - n2 * r1;
    if det.abs() < 1e-9 {
        return None;
    }
    let over = (b1 * r2 - b2 * r1) / det;
    let per_request = (n1 * b2 - n2 * b1) / det;
    if !over.is_finite() || !per_request.is_finite() {
        return None;
    }
    Some((over, per_request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscale_proto::ResourceType;
    use chrono::{TimeZone, Utc};

    fn stat_at(ts: i64, requests: f64, vm_cpu: f64, vm_cpu_load: f64) -> Stat {
        Stat {
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            requests,
            online: 1,
            vm_cpu,
            vm_ram: 20.0,
            vm_cpu_load,
            vm_ram_load: 10.0,
            db_cpu: 10.0,
            db_ram: 20.0,
            db_cpu_load: 10.0,
            db_ram_load: 10.0,
            availability: 0.0,
            cost_total: 0.0,
            last1: 0.0,
            last5: 0.0,
            last15: 0.0,
            last_hour: 0.0,
            last_day: 0.0,
            last_week: 0.0,
            offline_time: 0.0,
            online_time: 0.0,
            requests_total: 0.0,
            response_time: 0.0,
        }
    }

    fn empty_prices() -> HashMap<ResourceType, Vec<Price>> {
        let mut m = HashMap::new();
        m.insert(ResourceType::Vm, vec![]);
        m.insert(ResourceType::Db, vec![]);
        m
    }

    #[test]
    fn evicts_eldest_beyond_memory_size() {
        let mut store = StatStore::new(3, 0.001, None);
        for i in 0..5 {
            store.record(stat_at(1000 + i, 10.0, 10.0, 10.0), &empty_prices());
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.last().unwrap().timestamp.timestamp(), 1004);
    }

    #[test]
    fn duplicate_timestamp_replaces_in_place() {
        let mut store = StatStore::new(10, 0.001, None);
        store.record(stat_at(1000, 10.0, 10.0, 10.0), &empty_prices());
        store.record(stat_at(1001, 20.0, 10.0, 10.0), &empty_prices());
        store.record(stat_at(1000, 99.0, 10.0, 10.0), &empty_prices());
        assert_eq!(store.len(), 2);
        let history = store.history(10);
        assert_eq!(history[0].requests, 99.0);
    }

    #[test]
    fn zero_load_field_clears_is_overhead_calc_without_changing_model() {
        let mut store = StatStore::new(10, 0.001, None);
        store.record(stat_at(1000, 100.0, 10.0, 10.0), &empty_prices());
        store.record(stat_at(1001, 200.0, 10.0, 0.0), &empty_prices());
        assert!(!store.is_fit());
        let (over, _) = store.overhead(ResourceType::Vm);
        assert_eq!(over, 0.05); // default, unchanged
    }

    #[test]
    fn single_record_never_attempts_a_fit() {
        let mut store = StatStore::new(10, 0.001, None);
        store.record(stat_at(1000, 100.0, 10.0, 10.0), &empty_prices());
        assert!(!store.is_fit());
    }

    #[test]
    fn persistence_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("memory.json");
        {
            let store_backend = JsonHistoryStore::new(&path);
            let mut store = StatStore::new(10, 0.001, Some(store_backend));
            store.record(stat_at(1000, 100.0, 10.0, 10.0), &empty_prices());
            store.record(stat_at(1001, 200.0, 10.0, 10.0), &empty_prices());
        }
        let reloaded_backend = JsonHistoryStore::new(&path);
        let reloaded = StatStore::new(10, 0.001, Some(reloaded_backend));
        assert_eq!(reloaded.len(), 2);
    }
}
