//! Integer/binary linear programs backing the autoscaler's capacity decisions.
//!
//! Three programs, all minimising `sum((cost - penalty) * x)` so that ties on
//! cost are broken toward fewer pods:
//!
//! - [`CapacityPlanner::plan`] — cheapest multiset of offered [`Price`]s covering a demand.
//! - [`CapacityPlanner::plan_optimal`] — same, but demand is derived from a request rate
//!   scaled so each pod stays under the configured load ceiling.
//! - [`CapacityPlanner::select_existing`] — cheapest (by count) subset of the current
//!   fleet that alone covers a demand, used to avoid needless churn.
//!
//! Backed by `good_lp`'s bundled `microlp` branch-and-bound solver — the only
//! pure-Rust backend in this dependency stack that supports integer/binary
//! variables (the other pure-Rust option, `clarabel`, is a continuous
//! interior-point solver and cannot express these programs).

#![forbid(unsafe_code)]

use autoscale_proto::{Price, Resource};
use good_lp::solvers::microlp::microlp;
use good_lp::{constraint, variable, variables, Expression, ResolutionError, Solution, SolverModel, Variable};
use tracing::warn;

/// Tiny per-pod cost penalty that breaks cost ties toward fewer pods.
pub const DEFAULT_PENALTY: f64 = 0.001;

/// Solves the capacity-planning ILPs. Stateless beyond the tie-breaking penalty,
/// which is part of `Settings` rather than a hardcoded constant.
#[derive(Debug, Clone, Copy)]
pub struct CapacityPlanner {
    penalty: f64,
}

impl Default for CapacityPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_PENALTY)
    }
}

impl CapacityPlanner {
    pub fn new(penalty: f64) -> Self {
        Self { penalty }
    }

    /// Cheapest multiset of `prices` whose overhead-adjusted CPU/RAM sums cover
    /// `need_cpu`/`need_ram`. Returns an empty plan if `prices` is empty, demand
    /// is already met by zero pods, or the solver can't find a feasible point.
    pub fn plan(
        &self,
        prices: &[Price],
        need_cpu: f64,
        need_ram: f64,
        cpu_over: f64,
        ram_over: f64,
    ) -> Vec<Price> {
        if prices.is_empty() {
            return Vec::new();
        }

        let mut vars = variables!();
        let xs: Vec<Variable> = prices
            .iter()
            .map(|_| vars.add(variable().integer().min(0)))
            .collect();

        let cost_expr = fold_expr(&xs, prices, |p| p.cost as f64 - self.penalty);
        let cpu_expr = fold_expr(&xs, prices, |p| p.cpu as f64 - cpu_over);
        let ram_expr = fold_expr(&xs, prices, |p| p.ram as f64 - ram_over);

        let solution = vars
            .minimise(cost_expr)
            .using(microlp)
            .with(constraint!(cpu_expr >= need_cpu))
            .with(constraint!(ram_expr >= need_ram))
            .solve();

        materialize(solution, &xs, prices)
    }

    /// Like [`Self::plan`], but demand is derived from a forecast `requests`
    /// rate scaled by per-request resource cost, and each pod's usable
    /// capacity is capped at `pod_load_max_percent` of its nominal size before
    /// overhead is subtracted.
    pub fn plan_optimal(
        &self,
        prices: &[Price],
        requests: f64,
        cpu_per_req: f64,
        ram_per_req: f64,
        cpu_over: f64,
        ram_over: f64,
        pod_load_max_percent: f64,
    ) -> Vec<Price> {
        if prices.is_empty() {
            return Vec::new();
        }

        let need_cpu = requests * cpu_per_req;
        let need_ram = requests * ram_per_req;

        let mut vars = variables!();
        let xs: Vec<Variable> = prices
            .iter()
            .map(|_| vars.add(variable().integer().min(0)))
            .collect();

        let cost_expr = fold_expr(&xs, prices, |p| p.cost as f64 - self.penalty);
        let cpu_expr = fold_expr(&xs, prices, |p| pod_load_max_percent * p.cpu as f64 - cpu_over);
        let ram_expr = fold_expr(&xs, prices, |p| pod_load_max_percent * p.ram as f64 - ram_over);

        let solution = vars
            .minimise(cost_expr)
            .using(microlp)
            .with(constraint!(cpu_expr >= need_cpu))
            .with(constraint!(ram_expr >= need_ram))
            .solve();

        materialize(solution, &xs, prices)
    }

    /// Cheapest (by count) subset of `pods` whose overhead-adjusted CPU/RAM
    /// sums cover `need_cpu`/`need_ram`. Callers must pre-filter `pods` to
    /// active (non-failed) members. Returns an empty set if no feasible or
    /// optimal subset exists — the caller treats that as "plan from scratch".
    pub fn select_existing(
        &self,
        pods: &[Resource],
        need_cpu: f64,
        need_ram: f64,
        cpu_over: f64,
        ram_over: f64,
    ) -> Vec<String> {
        if pods.is_empty() {
            return Vec::new();
        }

        let mut vars = variables!();
        let xs: Vec<Variable> = pods.iter().map(|_| vars.add(variable().binary())).collect();

        // Objective: minimise the number of retained pods (the explicit `sum x`
        // reading of the ambiguous source objective, see DESIGN.md).
        let count_expr = xs.iter().fold(Expression::from(0.0), |acc, x| acc + *x);
        let cpu_expr = fold_expr_resources(&xs, pods, |p| p.cpu as f64 - cpu_over);
        let ram_expr = fold_expr_resources(&xs, pods, |p| p.ram as f64 - ram_over);

        let solution = vars
            .minimise(count_expr)
            .using(microlp)
            .with(constraint!(cpu_expr >= need_cpu))
            .with(constraint!(ram_expr >= need_ram))
            .solve();

        let solution = match solution {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "select_existing: no optimal retention subset, planning from scratch");
                return Vec::new();
            }
        };

        xs.iter()
            .zip(pods)
            .filter(|(x, _)| solution.value(**x) > 0.5)
            .map(|(_, pod)| pod.id.clone())
            .collect()
    }
}

fn fold_expr(xs: &[Variable], prices: &[Price], coeff: impl Fn(&Price) -> f64) -> Expression {
    xs.iter()
        .zip(prices)
        .fold(Expression::from(0.0), |acc, (x, p)| acc + coeff(p) * *x)
}

fn fold_expr_resources(xs: &[Variable], pods: &[Resource], coeff: impl Fn(&Resource) -> f64) -> Expression {
    xs.iter()
        .zip(pods)
        .fold(Expression::from(0.0), |acc, (x, p)| acc + coeff(p) * *x)
}

fn materialize<S: Solution>(
    solution: Result<S, ResolutionError>,
    xs: &[Variable],
    prices: &[Price],
) -> Vec<Price> {
    let solution = match solution {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "capacity planner solve failed, returning empty plan");
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for (x, price) in xs.iter().zip(prices) {
        let count = solution.value(*x).round();
        let count = if count.is_sign_negative() { 0 } else { count as u64 };
        out.extend(std::iter::repeat(price.clone()).take(count as usize));
    }
    out
}
