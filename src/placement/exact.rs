//! Exhaustive placement search with bounded backtracking
//!
//! Depth-first enumeration of device assignments in pipeline order, written
//! with an explicit stack and frontier (no recursion) so termination at the
//! backtrack limit is deterministic and testable. Branch-and-bound pruning
//! uses the monotone prefix cost as a lower bound.
//!
//! The backtrack counter increments on every retreat to an earlier layer.
//! Once it exceeds `backtrack_limit` the search stops and falls back to the
//! best feasible assignment found so far; a limit of 0 therefore degenerates
//! to a single descent that either succeeds immediately or reports
//! [`PlacementError::NoFeasiblePlacement`].

use tracing::warn;

use crate::config::CachePlacementStrategy;
use crate::graph::DeviceGraph;
use crate::workload::LayerDemand;

use super::cost::{placement_cost, prefix_cost};
use super::{layer_memory_demand, CapacitySnapshot, Placement, PlacementError, PlacementResult};

/// Outcome of an exact search, with search-effort accounting
#[derive(Debug, Clone)]
pub struct ExactOutcome {
    pub placement: Placement,
    /// Backtrack steps consumed before the search finished
    pub backtracks_used: usize,
    /// True when the search stopped at the limit rather than exhausting the
    /// space; the placement is then best-found, not provably optimal.
    pub hit_limit: bool,
}

/// Exhaustive search over all capacity-respecting device assignments
#[derive(Debug, Clone)]
pub struct ExactSearch {
    backtrack_limit: usize,
}

impl ExactSearch {
    pub fn new(backtrack_limit: usize) -> Self {
        ExactSearch { backtrack_limit }
    }

    /// Search for the minimum-cost feasible assignment
    ///
    /// Operates on a clone of `snapshot`; the caller's view is untouched.
    pub fn search(
        &self,
        graph: &DeviceGraph,
        demands: &[LayerDemand],
        snapshot: &CapacitySnapshot,
        strategy: CachePlacementStrategy,
    ) -> PlacementResult<ExactOutcome> {
        if demands.is_empty() {
            return Err(PlacementError::EmptyDemands);
        }

        let num_layers = demands.len();
        let num_devices = graph.num_devices();
        let mut snap = snapshot.clone();

        let mut assignment: Vec<usize> = Vec::with_capacity(num_layers);
        // next_device[k]: the frontier at depth k, the next device id to try.
        let mut next_device = vec![0usize; num_layers];
        let mut best: Option<(Vec<usize>, f64)> = None;
        let mut backtracks = 0usize;
        let mut hit_limit = false;

        let mut depth = 0usize;
        loop {
            let must_retreat = if depth == num_layers {
                let cost = placement_cost(graph, demands, &assignment).total();
                match &best {
                    Some((_, best_cost)) if *best_cost <= cost => {}
                    _ => best = Some((assignment.clone(), cost)),
                }
                true
            } else {
                !self.advance(
                    graph,
                    demands,
                    strategy,
                    &mut snap,
                    &mut assignment,
                    &mut next_device[depth],
                    &best,
                    num_devices,
                )
            };

            if must_retreat {
                if depth < num_layers {
                    next_device[depth] = 0;
                }
                if depth == 0 {
                    break;
                }
                backtracks += 1;
                if backtracks > self.backtrack_limit {
                    hit_limit = true;
                    break;
                }
                depth -= 1;
                let device = assignment.pop().expect("assignment matches depth");
                snap.uncommit(
                    device,
                    layer_memory_demand(&demands[depth], strategy),
                    demands[depth].compute_flops,
                );
            } else {
                depth += 1;
            }
        }

        match best {
            Some((assignments, _)) => {
                if hit_limit {
                    warn!(
                        backtracks,
                        limit = self.backtrack_limit,
                        "exact search hit backtrack limit, using best assignment found"
                    );
                }
                Ok(ExactOutcome {
                    placement: Placement { assignments },
                    backtracks_used: backtracks,
                    hit_limit,
                })
            }
            None => Err(PlacementError::NoFeasiblePlacement),
        }
    }

    /// Try to extend the assignment at the current depth. Returns false when
    /// every remaining device at this depth is infeasible or pruned.
    #[allow(clippy::too_many_arguments)]
    fn advance(
        &self,
        graph: &DeviceGraph,
        demands: &[LayerDemand],
        strategy: CachePlacementStrategy,
        snap: &mut CapacitySnapshot,
        assignment: &mut Vec<usize>,
        next_device: &mut usize,
        best: &Option<(Vec<usize>, f64)>,
        num_devices: usize,
    ) -> bool {
        let depth = assignment.len();
        let memory = layer_memory_demand(&demands[depth], strategy);
        let flops = demands[depth].compute_flops;

        while *next_device < num_devices {
            let device = *next_device;
            *next_device += 1;

            if !snap.fits(device, memory, flops) {
                continue;
            }

            assignment.push(device);
            if let Some((_, best_cost)) = best {
                let bound = prefix_cost(graph, demands, assignment).total();
                if bound >= *best_cost {
                    assignment.pop();
                    continue;
                }
            }
            snap.commit(device, memory, flops);
            return true;
        }
        false
    }
}
