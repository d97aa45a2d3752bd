//! Resource-aware greedy placement with one local-search pass
//!
//! Assigns each layer, in pipeline order, to the feasible device with the
//! lowest marginal cost (ties broken by lower post-commit load ratio, then
//! lower device id), then makes a single pass over layer pairs swapping two
//! layers' devices whenever the swap strictly reduces cost and keeps both
//! feasible. No backtracking: either a feasible placement comes out or
//! [`PlacementError::NoFeasiblePlacement`] is reported.

use crate::config::CachePlacementStrategy;
use crate::graph::DeviceGraph;
use crate::workload::LayerDemand;

use super::cost::{placement_cost, prefix_cost};
use super::{layer_memory_demand, CapacitySnapshot, Placement, PlacementError, PlacementResult};

#[derive(Debug, Clone, Default)]
pub struct HeuristicSearch;

impl HeuristicSearch {
    pub fn new() -> Self {
        HeuristicSearch
    }

    /// Greedy assignment followed by one swap pass
    ///
    /// Operates on a clone of `snapshot`; the caller's view is untouched.
    pub fn search(
        &self,
        graph: &DeviceGraph,
        demands: &[LayerDemand],
        snapshot: &CapacitySnapshot,
        strategy: CachePlacementStrategy,
    ) -> PlacementResult<Placement> {
        if demands.is_empty() {
            return Err(PlacementError::EmptyDemands);
        }

        let mut snap = snapshot.clone();
        let mut assignments: Vec<usize> = Vec::with_capacity(demands.len());

        for demand in demands {
            let memory = layer_memory_demand(demand, strategy);
            let flops = demand.compute_flops;

            let mut choice: Option<(f64, f64, usize)> = None;
            for device in 0..graph.num_devices() {
                if !snap.fits(device, memory, flops) {
                    continue;
                }
                assignments.push(device);
                let cost = prefix_cost(graph, demands, &assignments).total();
                assignments.pop();
                let ratio = post_commit_ratio(graph, &snap, device, memory, flops);
                let key = (cost, ratio, device);
                if choice.map_or(true, |c| key < c) {
                    choice = Some(key);
                }
            }

            let (_, _, device) = choice.ok_or(PlacementError::NoFeasiblePlacement)?;
            snap.commit(device, memory, flops);
            assignments.push(device);
        }

        self.swap_pass(graph, demands, strategy, &mut snap, &mut assignments);

        Ok(Placement { assignments })
    }

    /// One pass over layer pairs: swap devices when it strictly helps
    fn swap_pass(
        &self,
        graph: &DeviceGraph,
        demands: &[LayerDemand],
        strategy: CachePlacementStrategy,
        snap: &mut CapacitySnapshot,
        assignments: &mut [usize],
    ) {
        let mut current_cost = placement_cost(graph, demands, assignments).total();

        for i in 0..assignments.len() {
            for j in (i + 1)..assignments.len() {
                let (di, dj) = (assignments[i], assignments[j]);
                if di == dj {
                    continue;
                }
                let (mem_i, fl_i) = (layer_memory_demand(&demands[i], strategy), demands[i].compute_flops);
                let (mem_j, fl_j) = (layer_memory_demand(&demands[j], strategy), demands[j].compute_flops);

                snap.uncommit(di, mem_i, fl_i);
                snap.uncommit(dj, mem_j, fl_j);
                let feasible = snap.fits(dj, mem_i, fl_i) && {
                    snap.commit(dj, mem_i, fl_i);
                    let ok = snap.fits(di, mem_j, fl_j);
                    if ok {
                        snap.commit(di, mem_j, fl_j);
                    } else {
                        snap.uncommit(dj, mem_i, fl_i);
                    }
                    ok
                };

                if !feasible {
                    snap.commit(di, mem_i, fl_i);
                    snap.commit(dj, mem_j, fl_j);
                    continue;
                }

                assignments[i] = dj;
                assignments[j] = di;
                let swapped_cost = placement_cost(graph, demands, assignments).total();
                if swapped_cost < current_cost {
                    current_cost = swapped_cost;
                } else {
                    // Revert the swap.
                    assignments[i] = di;
                    assignments[j] = dj;
                    snap.uncommit(dj, mem_i, fl_i);
                    snap.uncommit(di, mem_j, fl_j);
                    snap.commit(di, mem_i, fl_i);
                    snap.commit(dj, mem_j, fl_j);
                }
            }
        }
    }
}

/// Combined load ratio of a device after a hypothetical commit
fn post_commit_ratio(
    graph: &DeviceGraph,
    snap: &CapacitySnapshot,
    device: usize,
    memory_bytes: u64,
    compute_flops: f64,
) -> f64 {
    let mem_cap = graph.device(device).memory_capacity as f64;
    let fl_cap = graph.device(device).compute_capacity;
    let mem_used = mem_cap - (snap.memory_available(device) - memory_bytes) as f64;
    let fl_used = fl_cap - (snap.compute_available(device) - compute_flops);
    0.5 * mem_used / mem_cap + 0.5 * fl_used / fl_cap
}
