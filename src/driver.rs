//! Simulation driver: the per-step decision loop and run orchestration
//!
//! A run walks the workload's segments back to back, one generation step at
//! a time. Each step: derive per-layer demands, search for a placement on a
//! capacity snapshot, commit the winning assignment transactionally, let the
//! migration controller move or grow caches, then record a
//! [`StepMetrics`]. Per-step weight and compute commitments are released at
//! the end of the step; only KV cache bytes persist in the ledger between
//! steps.
//!
//! Fatal step errors (no feasible placement, refused migration) abort the
//! run; the partial trace collected so far is retained in the returned
//! [`RunTrace`]. The optional wall-clock time limit is checked between
//! steps only, never inside one.

use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{AlgorithmConfig, CachePlacementStrategy, PlacementMode, RunConfig, WorkloadConfig};
use crate::error::{SimError, SimResult};
use crate::graph::DeviceGraph;
use crate::ledger::ResourceLedger;
use crate::migration::{CacheState, MigrationController, MigrationEvent};
use crate::placement::cost::placement_cost;
use crate::placement::{
    CapacitySnapshot, CostBreakdown, ExactSearch, HeuristicSearch, Placement, PlacementError,
};
use crate::workload::{LayerDemand, WorkloadModel};

/// Everything recorded about one committed generation step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepMetrics {
    /// Global step index across all segments
    pub step: usize,
    /// Workload segment this step belongs to
    pub segment: usize,
    pub placement: Placement,
    pub cost: CostBreakdown,
    /// Activation transfer cost paid by pinned caches serving remote compute
    pub remote_access_secs: f64,
    pub migrations: Vec<MigrationEvent>,
    /// Search effort, recorded in exact mode only
    pub backtracks_used: Option<usize>,
    pub hit_backtrack_limit: bool,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Completed,
    /// No feasible placement (or refused migration) at the given step
    AbortedInfeasible { step: usize },
    /// Wall-clock budget exhausted before the given step ran
    AbortedTimeLimit { step: usize },
}

/// Full metric trace of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunTrace {
    pub name: String,
    pub run_index: usize,
    pub status: RunStatus,
    pub steps: Vec<StepMetrics>,
    /// Sum of per-step totals, including migration and remote-access time
    pub total_cost_secs: f64,
}

/// Drives placement, commitment and migration for a configured experiment
#[derive(Debug, Clone)]
pub struct SimulationDriver {
    graph: DeviceGraph,
    workload: WorkloadConfig,
    algorithm: AlgorithmConfig,
    run: RunConfig,
}

impl SimulationDriver {
    pub fn new(
        graph: DeviceGraph,
        workload: WorkloadConfig,
        algorithm: AlgorithmConfig,
        run: RunConfig,
    ) -> SimResult<Self> {
        workload.validate()?;
        algorithm.validate()?;
        run.validate()?;
        Ok(SimulationDriver {
            graph,
            workload,
            algorithm,
            run,
        })
    }

    /// Execute one run from a fresh ledger
    pub fn run_once(&self, run_index: usize) -> SimResult<RunTrace> {
        let model = WorkloadModel::from_config(&self.workload)?;
        let controller = MigrationController::new(&self.algorithm);
        let mut ledger = ResourceLedger::new(&self.graph);
        let mut cache = CacheState::new();

        let mut steps: Vec<StepMetrics> = Vec::with_capacity(self.workload.total_steps());
        let mut status = RunStatus::Completed;
        let started = Instant::now();
        let mut global_step = 0usize;

        'segments: for (segment, (&seq_len, &gen_steps)) in self
            .workload
            .initial_sequence_lengths
            .iter()
            .zip(self.workload.generation_steps.iter())
            .enumerate()
        {
            for t in 0..gen_steps {
                if let Some(limit) = self.run.time_limit {
                    if global_step > 0 && started.elapsed() >= limit {
                        warn!(step = global_step, "run hit wall-clock limit");
                        status = RunStatus::AbortedTimeLimit { step: global_step };
                        break 'segments;
                    }
                }

                let demands = model.demands_for(seq_len, t);
                match self.execute_step(
                    global_step,
                    segment,
                    &controller,
                    &mut ledger,
                    &mut cache,
                    &demands,
                ) {
                    Ok(metrics) => {
                        debug!(
                            step = global_step,
                            cost = metrics.cost.total(),
                            migrations = metrics.migrations.len(),
                            "step committed"
                        );
                        steps.push(metrics);
                    }
                    Err(err) if err.is_fatal() => {
                        warn!(step = global_step, %err, "run aborted");
                        status = RunStatus::AbortedInfeasible { step: global_step };
                        break 'segments;
                    }
                    Err(err) => return Err(err),
                }
                global_step += 1;
            }
        }

        let total_cost_secs = steps
            .iter()
            .map(|s| s.cost.total() + s.remote_access_secs)
            .sum();
        info!(
            run_index,
            steps = steps.len(),
            ?status,
            total_cost_secs,
            "run finished"
        );
        Ok(RunTrace {
            name: self.run.name.clone(),
            run_index,
            status,
            steps,
            total_cost_secs,
        })
    }

    /// Execute all configured runs in parallel
    ///
    /// Runs are independent (each starts from a fresh ledger), so they fan
    /// out across the rayon pool. Output order matches run index.
    pub fn run_many(&self) -> SimResult<Vec<RunTrace>> {
        (0..self.run.num_runs)
            .into_par_iter()
            .map(|run_index| self.run_once(run_index))
            .collect()
    }

    fn execute_step(
        &self,
        step: usize,
        segment: usize,
        controller: &MigrationController,
        ledger: &mut ResourceLedger,
        cache: &mut CacheState,
        demands: &[LayerDemand],
    ) -> SimResult<StepMetrics> {
        // Until the first placement seeds the caches, even a pinned-cache
        // configuration must budget KV bytes at the compute device.
        let strategy = if controller.caches_move() || !cache.is_initialized() {
            CachePlacementStrategy::Colocated
        } else {
            CachePlacementStrategy::Decoupled
        };

        let snapshot = self.step_snapshot(controller, ledger, cache);

        let (placement, backtracks_used, hit_backtrack_limit) =
            match self.algorithm.placement_mode {
                PlacementMode::Exact => {
                    let outcome = ExactSearch::new(self.algorithm.backtrack_limit)
                        .search(&self.graph, demands, &snapshot, strategy)
                        .map_err(|err| fatal_placement(err, step))?;
                    (
                        outcome.placement,
                        Some(outcome.backtracks_used),
                        outcome.hit_limit,
                    )
                }
                PlacementMode::Heuristic => {
                    let placement = HeuristicSearch::new()
                        .search(&self.graph, demands, &snapshot, strategy)
                        .map_err(|err| fatal_placement(err, step))?;
                    (placement, None, false)
                }
            };

        // Commit the step's weight and compute footprint; abandoning the
        // transaction on any refusal leaves the ledger as the step found it.
        let mut txn = ledger.transaction();
        for (layer, demand) in demands.iter().enumerate() {
            let device = placement.device_for(layer);
            if txn
                .try_commit(device, demand.weight_bytes, demand.compute_flops)
                .is_err()
            {
                drop(txn);
                return Err(SimError::NoFeasiblePlacement { step });
            }
        }
        txn.commit();

        let outcome = controller.apply(step, &self.graph, ledger, cache, &placement, demands)?;

        let mut cost = placement_cost(&self.graph, demands, &placement.assignments);
        cost.migration_secs = outcome.migration_secs();

        // Candidacy for the next step reflects the load this step leaves
        // behind, before per-step commitments are returned.
        controller.mark_candidates(ledger, cache);
        for (layer, demand) in demands.iter().enumerate() {
            ledger.release(
                placement.device_for(layer),
                demand.weight_bytes,
                demand.compute_flops,
            );
        }

        Ok(StepMetrics {
            step,
            segment,
            placement,
            cost,
            remote_access_secs: outcome.remote_access_secs,
            migrations: outcome.events,
            backtracks_used,
            hit_backtrack_limit,
        })
    }

    /// Capacity view the search operates on
    ///
    /// When caches may move, their current bytes are excluded from the view:
    /// the search re-budgets the grown cache at whichever device it picks.
    /// Pinned caches stay in the view and the search budgets weights only.
    fn step_snapshot(
        &self,
        controller: &MigrationController,
        ledger: &ResourceLedger,
        cache: &CacheState,
    ) -> CapacitySnapshot {
        if controller.caches_move() && cache.is_initialized() {
            let mut view = ledger.clone();
            for entry in cache.entries() {
                view.release(entry.host, entry.bytes, 0.0);
            }
            CapacitySnapshot::from_ledger(&view)
        } else {
            CapacitySnapshot::from_ledger(ledger)
        }
    }
}

fn fatal_placement(err: PlacementError, step: usize) -> SimError {
    match err {
        PlacementError::NoFeasiblePlacement | PlacementError::EmptyDemands => {
            SimError::NoFeasiblePlacement { step }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelType;
    use crate::graph::{Device, DeviceGraph, Link};
    use std::time::Duration;

    // SMALL fp32: 12 layers x ~28MB weights, KV well under 1MB per layer.
    fn roomy_graph() -> DeviceGraph {
        DeviceGraph::new(
            vec![
                Device::new(0, 8 << 30, 1e12),
                Device::new(1, 8 << 30, 1e12),
                Device::new(2, 8 << 30, 1e12),
            ],
            vec![
                Link::new(0, 1, 1e9),
                Link::new(1, 2, 1e9),
            ],
        )
        .unwrap()
    }

    fn driver(graph: DeviceGraph, algorithm: AlgorithmConfig) -> SimulationDriver {
        SimulationDriver::new(
            graph,
            WorkloadConfig::new(ModelType::Small).with_segments(vec![128], vec![8]),
            algorithm,
            RunConfig::new("test"),
        )
        .unwrap()
    }

    #[test]
    fn test_completed_run_covers_all_steps() {
        let d = driver(roomy_graph(), AlgorithmConfig::default());
        let trace = d.run_once(0).unwrap();
        assert_eq!(trace.status, RunStatus::Completed);
        assert_eq!(trace.steps.len(), 8);
        assert!(trace.total_cost_secs > 0.0);
        for (i, s) in trace.steps.iter().enumerate() {
            assert_eq!(s.step, i);
            assert_eq!(s.segment, 0);
            assert_eq!(s.placement.num_layers(), 12);
        }
    }

    #[test]
    fn test_replay_is_deterministic() {
        let d = driver(roomy_graph(), AlgorithmConfig::default());
        let a = d.run_once(0).unwrap();
        let b = d.run_once(0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_exact_mode_records_search_effort() {
        let d = driver(
            roomy_graph(),
            AlgorithmConfig::new()
                .with_placement_mode(PlacementMode::Exact)
                .with_backtrack_limit(50),
        );
        let trace = d.run_once(0).unwrap();
        assert_eq!(trace.status, RunStatus::Completed);
        for s in &trace.steps {
            assert!(s.backtracks_used.is_some());
        }
    }

    #[test]
    fn test_infeasible_aborts_with_partial_trace() {
        // One tiny device: SMALL weights alone exceed 1KB immediately.
        let graph = DeviceGraph::new(vec![Device::new(0, 1024, 1e12)], vec![]).unwrap();
        let d = driver(graph, AlgorithmConfig::default());
        let trace = d.run_once(0).unwrap();
        assert_eq!(trace.status, RunStatus::AbortedInfeasible { step: 0 });
        assert!(trace.steps.is_empty());
    }

    #[test]
    fn test_time_limit_checked_between_steps() {
        let d = SimulationDriver::new(
            roomy_graph(),
            WorkloadConfig::new(ModelType::Small).with_segments(vec![128], vec![8]),
            AlgorithmConfig::default(),
            RunConfig::new("budget").with_time_limit(Duration::from_nanos(1)),
        )
        .unwrap();
        let trace = d.run_once(0).unwrap();
        // The first step always runs; the budget check trips before step 1.
        assert_eq!(trace.status, RunStatus::AbortedTimeLimit { step: 1 });
        assert_eq!(trace.steps.len(), 1);
    }

    #[test]
    fn test_pinned_caches_never_migrate() {
        let d = driver(
            roomy_graph(),
            AlgorithmConfig::new().with_dynamic_adjustment(false),
        );
        let trace = d.run_once(0).unwrap();
        assert_eq!(trace.status, RunStatus::Completed);
        for s in &trace.steps {
            assert!(s.migrations.is_empty());
        }
    }

    #[test]
    fn test_segments_run_back_to_back() {
        let d = SimulationDriver::new(
            roomy_graph(),
            WorkloadConfig::new(ModelType::Small).with_segments(vec![64, 256], vec![3, 2]),
            AlgorithmConfig::default(),
            RunConfig::new("segments"),
        )
        .unwrap();
        let trace = d.run_once(0).unwrap();
        assert_eq!(trace.steps.len(), 5);
        assert_eq!(trace.steps[2].segment, 0);
        assert_eq!(trace.steps[3].segment, 1);
        assert_eq!(trace.steps[3].step, 3);
    }

    #[test]
    fn test_run_many_is_ordered_and_reproducible() {
        let d = SimulationDriver::new(
            roomy_graph(),
            WorkloadConfig::new(ModelType::Small).with_segments(vec![128], vec![4]),
            AlgorithmConfig::default(),
            RunConfig::new("many").with_num_runs(4),
        )
        .unwrap();
        let traces = d.run_many().unwrap();
        assert_eq!(traces.len(), 4);
        for (i, trace) in traces.iter().enumerate() {
            assert_eq!(trace.run_index, i);
            assert_eq!(trace.status, RunStatus::Completed);
            // Fresh ledger per run: all runs see identical decisions.
            assert_eq!(trace.steps, traces[0].steps);
        }
    }

    #[test]
    fn test_trace_serializes() {
        let d = driver(roomy_graph(), AlgorithmConfig::default());
        let trace = d.run_once(0).unwrap();
        let json = serde_json::to_string(&trace).unwrap();
        assert!(json.contains("\"status\":\"Completed\""));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let result = SimulationDriver::new(
            roomy_graph(),
            WorkloadConfig::new(ModelType::Small).with_segments(vec![], vec![]),
            AlgorithmConfig::default(),
            RunConfig::new("bad"),
        );
        assert!(matches!(result, Err(SimError::InvalidConfiguration(_))));
    }
}
