//! Placement search: layer-to-device assignment for one generation step
//!
//! ## Module Structure
//!
//! - [`cost`] - Pipeline wall-clock cost model
//! - [`exact`] - Exhaustive stack-based search bounded by `backtrack_limit`
//! - [`heuristic`] - Greedy marginal-cost assignment with one swap pass
//!
//! Both engines operate on a [`CapacitySnapshot`] taken from the resource
//! ledger at the start of the step, never on live ledger state: branches
//! explore freely and only the winning assignment is committed afterwards.

pub mod cost;
pub mod exact;
pub mod heuristic;

pub use cost::CostBreakdown;
pub use exact::ExactSearch;
pub use heuristic::HeuristicSearch;

use serde::Serialize;
use thiserror::Error;

use crate::config::CachePlacementStrategy;
use crate::ledger::ResourceLedger;
use crate::workload::LayerDemand;

#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("no feasible placement: capacity cannot be satisfied for all layers")]
    NoFeasiblePlacement,
    #[error("placement requested for an empty demand sequence")]
    EmptyDemands,
}

pub type PlacementResult<T> = Result<T, PlacementError>;

/// Layer-to-device assignment for one step, in pipeline order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    /// `assignments[layer]` is the hosting device id
    pub assignments: Vec<usize>,
}

impl Placement {
    pub fn device_for(&self, layer: usize) -> usize {
        self.assignments[layer]
    }

    pub fn num_layers(&self) -> usize {
        self.assignments.len()
    }
}

/// Memory a layer requires on its compute device under a given strategy
///
/// Colocated carries the KV cache with the compute; Decoupled moves weights
/// only and leaves the cache wherever it lives.
pub fn layer_memory_demand(demand: &LayerDemand, strategy: CachePlacementStrategy) -> u64 {
    match strategy {
        CachePlacementStrategy::Colocated => demand.memory_bytes(),
        CachePlacementStrategy::Decoupled => demand.weight_bytes,
    }
}

/// Consistent view of remaining capacity at the point the step began
///
/// Search engines mutate their snapshot as they explore; the live ledger is
/// only touched once a winning assignment is selected.
#[derive(Debug, Clone)]
pub struct CapacitySnapshot {
    memory_available: Vec<u64>,
    compute_available: Vec<f64>,
}

impl CapacitySnapshot {
    pub fn from_ledger(ledger: &ResourceLedger) -> Self {
        let n = ledger.num_devices();
        CapacitySnapshot {
            memory_available: (0..n).map(|d| ledger.memory_available(d)).collect(),
            compute_available: (0..n).map(|d| ledger.compute_available(d)).collect(),
        }
    }

    pub fn num_devices(&self) -> usize {
        self.memory_available.len()
    }

    pub fn fits(&self, device: usize, memory_bytes: u64, compute_flops: f64) -> bool {
        memory_bytes <= self.memory_available[device]
            && compute_flops <= self.compute_available[device]
    }

    pub fn commit(&mut self, device: usize, memory_bytes: u64, compute_flops: f64) {
        debug_assert!(self.fits(device, memory_bytes, compute_flops));
        self.memory_available[device] -= memory_bytes;
        self.compute_available[device] -= compute_flops;
    }

    pub fn uncommit(&mut self, device: usize, memory_bytes: u64, compute_flops: f64) {
        self.memory_available[device] += memory_bytes;
        self.compute_available[device] += compute_flops;
    }

    pub fn memory_available(&self, device: usize) -> u64 {
        self.memory_available[device]
    }

    pub fn compute_available(&self, device: usize) -> f64 {
        self.compute_available[device]
    }
}
