//! edgesim - Placement and migration engine for distributed inference
//!
//! Simulates autoregressive transformer inference pipelined across a
//! heterogeneous device network. Each generation step, the engine assigns
//! model layers to devices under memory and compute capacity constraints,
//! estimates the step's wall-clock cost, and relocates KV caches when
//! device load crosses the migration threshold. Nothing is executed; the
//! engine optimizes over a closed-form demand model and emits metric
//! traces.

pub mod config;
pub mod driver;
pub mod error;
pub mod graph;
pub mod ledger;
pub mod migration;
pub mod placement;
pub mod workload;

pub use config::{
    AlgorithmConfig, CachePlacementStrategy, ModelType, PlacementMode, RunConfig, WorkloadConfig,
};
pub use driver::{RunStatus, RunTrace, SimulationDriver, StepMetrics};
pub use error::{ErrorCategory, SimError, SimResult};
pub use graph::{Device, DeviceGraph, Link};
pub use ledger::ResourceLedger;
pub use migration::{CacheStatus, MigrationController, MigrationEvent};
pub use placement::{CostBreakdown, ExactSearch, HeuristicSearch, Placement};
pub use workload::{LayerDemand, WorkloadModel};
