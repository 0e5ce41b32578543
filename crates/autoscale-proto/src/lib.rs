//! Core data types shared by every autoscaler component.
//!
//! These types mirror the wire shapes of the remote fleet API (`Price`,
//! `Resource`, `PostResource`, `Stat`) plus the two pieces of model state the
//! control loop carries across ticks (`OverheadModel`, `LoadTrail`).

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── ResourceType ────────────────────────────────────────────────────────────

/// The two fleet pools the autoscaler manages. There is no cross-type
/// substitution: VM demand is never satisfied by a DB pod or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Vm,
    Db,
}

impl ResourceType {
    pub const ALL: [ResourceType; 2] = [ResourceType::Vm, ResourceType::Db];
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vm => write!(f, "vm"),
            Self::Db => write!(f, "db"),
        }
    }
}

/// One of the four capacity dimensions the overhead fitter and the load
/// trail reason about independently: a `ResourceType` crossed with `{cpu, ram}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    VmCpu,
    VmRam,
    DbCpu,
    DbRam,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::VmCpu,
        Dimension::VmRam,
        Dimension::DbCpu,
        Dimension::DbRam,
    ];

    pub fn resource_type(self) -> ResourceType {
        match self {
            Dimension::VmCpu | Dimension::VmRam => ResourceType::Vm,
            Dimension::DbCpu | Dimension::DbRam => ResourceType::Db,
        }
    }
}

// ─── Price ───────────────────────────────────────────────────────────────────

/// An offered pod size, as listed by `GET /api/price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    pub cost: u64,
    pub cpu: u64,
    pub ram: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceType,
}

// ─── Resource (fleet member) ─────────────────────────────────────────────────

/// A provisioned pod, as reported by `GET /api/resource`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub cost: u64,
    pub cpu: u64,
    pub ram: u64,
    pub cpu_load: f64,
    pub ram_load: f64,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub failed_until: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub kind: ResourceType,
}

impl Resource {
    pub fn shape(&self) -> (u64, u64) {
        (self.cpu, self.ram)
    }
}

// ─── PostResource ────────────────────────────────────────────────────────────

/// A desired pod shape, sent as the body of a create or resize mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostResource {
    pub cpu: u64,
    pub ram: u64,
    #[serde(rename = "type")]
    pub kind: ResourceType,
}

impl PostResource {
    pub fn new(cpu: u64, ram: u64, kind: ResourceType) -> Self {
        Self { cpu, ram, kind }
    }

    pub fn shape(&self) -> (u64, u64) {
        (self.cpu, self.ram)
    }
}

impl From<&Price> for PostResource {
    fn from(p: &Price) -> Self {
        Self::new(p.cpu, p.ram, p.kind)
    }
}

// ─── Stat ────────────────────────────────────────────────────────────────────

/// A single timestamped aggregate sample from `GET /api/statistic`.
///
/// Only `timestamp`, `requests`, `online` and the per-type capacity/load
/// aggregates are consulted by the decision engine; the remaining fields are
/// retained for telemetry/passthrough and default to zero when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub timestamp: DateTime<Utc>,
    pub requests: f64,
    #[serde(default)]
    pub online: u64,

    pub vm_cpu: f64,
    pub vm_ram: f64,
    pub vm_cpu_load: f64,
    pub vm_ram_load: f64,
    pub db_cpu: f64,
    pub db_ram: f64,
    pub db_cpu_load: f64,
    pub db_ram_load: f64,

    #[serde(default)]
    pub availability: f64,
    #[serde(default)]
    pub cost_total: f64,
    #[serde(default)]
    pub last1: f64,
    #[serde(default)]
    pub last5: f64,
    #[serde(default)]
    pub last15: f64,
    #[serde(default)]
    pub last_hour: f64,
    #[serde(default)]
    pub last_day: f64,
    #[serde(default)]
    pub last_week: f64,
    #[serde(default)]
    pub offline_time: f64,
    #[serde(default)]
    pub online_time: f64,
    #[serde(default)]
    pub requests_total: f64,
    #[serde(default)]
    pub response_time: f64,
}

impl Stat {
    /// Reported capacity for a dimension (`vm_cpu`, `db_ram`, ...).
    pub fn capacity(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::VmCpu => self.vm_cpu,
            Dimension::VmRam => self.vm_ram,
            Dimension::DbCpu => self.db_cpu,
            Dimension::DbRam => self.db_ram,
        }
    }

    /// Reported load percentage (0-100) for a dimension.
    pub fn load_pct(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::VmCpu => self.vm_cpu_load,
            Dimension::VmRam => self.vm_ram_load,
            Dimension::DbCpu => self.db_cpu_load,
            Dimension::DbRam => self.db_ram_load,
        }
    }

    /// `(cpu, ram)` reported capacity for a resource type.
    pub fn type_capacity(&self, t: ResourceType) -> (f64, f64) {
        match t {
            ResourceType::Vm => (self.vm_cpu, self.vm_ram),
            ResourceType::Db => (self.db_cpu, self.db_ram),
        }
    }

    /// All four load-percentage fields, used by the overhead fitter's zero-check.
    pub fn load_fields(&self) -> [f64; 4] {
        [self.vm_cpu_load, self.vm_ram_load, self.db_cpu_load, self.db_ram_load]
    }
}

// ─── OverheadModel ───────────────────────────────────────────────────────────

/// Per-pod fixed CPU/RAM overhead and per-request resource cost, one pair per
/// `Dimension`. Mutated only by `autoscale_stats`'s overhead fitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverheadModel {
    pub vm_cpu_over: f64,
    pub vm_ram_over: f64,
    pub vm_cpu_req: f64,
    pub vm_ram_req: f64,
    pub db_cpu_over: f64,
    pub db_ram_over: f64,
    pub db_cpu_req: f64,
    pub db_ram_req: f64,
    pub is_overhead_calc: bool,
}

impl Default for OverheadModel {
    fn default() -> Self {
        Self {
            vm_cpu_over: 0.05,
            vm_ram_over: 0.3,
            vm_cpu_req: 0.001,
            vm_ram_req: 0.005,
            db_cpu_over: 0.05,
            db_ram_over: 0.512,
            db_cpu_req: 0.001,
            db_ram_req: 0.03,
            is_overhead_calc: false,
        }
    }
}

impl OverheadModel {
    /// `(cpu_overhead, ram_overhead)` for a resource type.
    pub fn overhead(&self, t: ResourceType) -> (f64, f64) {
        match t {
            ResourceType::Vm => (self.vm_cpu_over, self.vm_ram_over),
            ResourceType::Db => (self.db_cpu_over, self.db_ram_over),
        }
    }

    /// `(cpu_per_request, ram_per_request)` for a resource type.
    pub fn per_request(&self, t: ResourceType) -> (f64, f64) {
        match t {
            ResourceType::Vm => (self.vm_cpu_req, self.vm_ram_req),
            ResourceType::Db => (self.db_cpu_req, self.db_ram_req),
        }
    }

    /// Overwrite the `(overhead, per_request)` pair for a single dimension.
    /// Callers are responsible for validating non-negativity and atomicity
    /// across all four dimensions before calling this.
    pub fn set_dimension(&mut self, dim: Dimension, over: f64, per_request: f64) {
        match dim {
            Dimension::VmCpu => {
                self.vm_cpu_over = over;
                self.vm_cpu_req = per_request;
            }
            Dimension::VmRam => {
                self.vm_ram_over = over;
                self.vm_ram_req = per_request;
            }
            Dimension::DbCpu => {
                self.db_cpu_over = over;
                self.db_cpu_req = per_request;
            }
            Dimension::DbRam => {
                self.db_ram_over = over;
                self.db_ram_req = per_request;
            }
        }
    }
}

// ─── LoadTrail ────────────────────────────────────────────────────────────────

/// Bounded history of absolute CPU/RAM load for one resource type, appended to
/// once per tick and consulted by the dampening heuristic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadTrail {
    pub cpu: Vec<f64>,
    pub ram: Vec<f64>,
}

impl LoadTrail {
    pub fn push(&mut self, cpu_load: f64, ram_load: f64) {
        self.cpu.push(cpu_load);
        self.ram.push(ram_load);
    }

    /// Trim both vectors to the most recent `max_len` entries.
    pub fn trim(&mut self, max_len: usize) {
        trim_front(&mut self.cpu, max_len);
        trim_front(&mut self.ram, max_len);
    }

    /// Number of entries recorded (cpu and ram trails always stay in lockstep).
    pub fn len(&self) -> usize {
        self.cpu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty()
    }
}

fn trim_front(v: &mut Vec<f64>, max_len: usize) {
    if v.len() > max_len {
        let excess = v.len() - max_len;
        v.drain(0..excess);
    }
}

/// Mean of the `gap` entries immediately preceding the most recent one —
/// i.e. the slice `series[len - gap - 1 .. len - 1]`. Returns `None` when the
/// series doesn't hold enough history to take that window.
pub fn trailing_mean_excluding_last(series: &[f64], gap: usize) -> Option<f64> {
    let len = series.len();
    if len < gap + 1 {
        return None;
    }
    let window = &series[len - gap - 1..len - 1];
    if window.is_empty() {
        return None;
    }
    Some(window.iter().sum::<f64>() / window.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ResourceType::Vm).unwrap(), "\"vm\"");
        assert_eq!(serde_json::to_string(&ResourceType::Db).unwrap(), "\"db\"");
    }

    #[test]
    fn post_resource_from_price() {
        let price = Price {
            id: "p1".into(),
            cost: 10,
            cpu: 1,
            ram: 2,
            name: "small".into(),
            kind: ResourceType::Vm,
        };
        let post = PostResource::from(&price);
        assert_eq!(post.shape(), (1, 2));
        assert_eq!(post.kind, ResourceType::Vm);
    }

    #[test]
    fn load_trail_trims_both_vectors_in_lockstep() {
        let mut trail = LoadTrail::default();
        for i in 0..10 {
            trail.push(i as f64, i as f64 * 2.0);
        }
        trail.trim(4);
        assert_eq!(trail.len(), 4);
        assert_eq!(trail.cpu, vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(trail.ram, vec![12.0, 14.0, 16.0, 18.0]);
    }

    #[test]
    fn trailing_mean_excludes_most_recent_value() {
        let series = vec![1.0, 2.0, 3.0, 4.0, 5.0, 100.0];
        // gap = 4: window is series[1..5] = [2,3,4,5]
        let mean = trailing_mean_excluding_last(&series, 4).unwrap();
        assert_eq!(mean, 3.5);
    }

    #[test]
    fn trailing_mean_none_when_too_short() {
        let series = vec![1.0, 2.0];
        assert!(trailing_mean_excluding_last(&series, 4).is_none());
    }

    #[test]
    fn overhead_model_defaults_match_spec() {
        let model = OverheadModel::default();
        assert_eq!(model.vm_cpu_over, 0.05);
        assert_eq!(model.vm_ram_over, 0.3);
        assert_eq!(model.db_ram_over, 0.512);
        assert!(!model.is_overhead_calc);
    }
}
