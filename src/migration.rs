//! Migration controller: lazy, placement-triggered KV cache relocation
//!
//! Each layer's cache walks a three-state machine:
//!
//! ```text
//! Stable -> CandidateForMigration   host device load ratio > threshold
//! CandidateForMigration -> Migrating  next placement moves the compute
//! Migrating -> Stable               destination commit + source release
//! ```
//!
//! Candidacy is re-evaluated after every committed step from per-device
//! aggregate load (the threshold is one scalar), with per-layer migration
//! granularity. Migration is never speculative: a candidate moves only when
//! the placement search actually assigns its compute elsewhere. With
//! `enable_dynamic_adjustment` off the controller skips threshold checks
//! entirely and caches stay pinned for the run; compute that moves anyway
//! pays a per-step activation transfer between cache host and compute
//! device.

use serde::Serialize;
use tracing::debug;

use crate::config::{AlgorithmConfig, CachePlacementStrategy};
use crate::error::{SimError, SimResult};
use crate::graph::DeviceGraph;
use crate::ledger::ResourceLedger;
use crate::placement::Placement;
use crate::workload::LayerDemand;

/// Cache lifecycle state for one layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheStatus {
    Stable,
    CandidateForMigration,
    Migrating,
}

/// Where one layer's KV cache lives and how big it is
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub host: usize,
    pub bytes: u64,
    pub status: CacheStatus,
}

/// Per-layer cache locations for a run
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    entries: Vec<CacheEntry>,
}

impl CacheState {
    pub fn new() -> Self {
        CacheState::default()
    }

    pub fn is_initialized(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn host_of(&self, layer: usize) -> usize {
        self.entries[layer].host
    }

    pub fn status_of(&self, layer: usize) -> CacheStatus {
        self.entries[layer].status
    }
}

/// A completed cache relocation between two consecutive steps
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationEvent {
    pub layer: usize,
    pub from: usize,
    pub to: usize,
    pub bytes: u64,
    /// bytes / path_bandwidth(from, to)
    pub secs: f64,
}

/// Outcome of applying the controller for one step transition
#[derive(Debug, Clone, Default)]
pub struct MigrationOutcome {
    pub events: Vec<MigrationEvent>,
    /// Activation transfer cost paid when a pinned cache serves compute on
    /// another device
    pub remote_access_secs: f64,
}

impl MigrationOutcome {
    pub fn migration_secs(&self) -> f64 {
        self.events.iter().map(|e| e.secs).sum()
    }
}

/// Decides and executes cache relocations between generation steps
#[derive(Debug, Clone)]
pub struct MigrationController {
    migration_threshold: f64,
    strategy: CachePlacementStrategy,
    enable_dynamic_adjustment: bool,
}

impl MigrationController {
    pub fn new(config: &AlgorithmConfig) -> Self {
        MigrationController {
            migration_threshold: config.migration_threshold,
            strategy: config.cache_placement_strategy,
            enable_dynamic_adjustment: config.enable_dynamic_adjustment,
        }
    }

    /// True when caches are allowed to follow compute at all
    pub fn caches_move(&self) -> bool {
        self.enable_dynamic_adjustment && self.strategy == CachePlacementStrategy::Colocated
    }

    /// Re-evaluate candidacy from per-device aggregate load
    ///
    /// Called after a step's ledger commits so the marking reflects the load
    /// the step left behind. Skipped entirely when dynamic adjustment is
    /// off.
    pub fn mark_candidates(&self, ledger: &ResourceLedger, cache: &mut CacheState) {
        if !self.enable_dynamic_adjustment {
            return;
        }
        for entry in cache.entries.iter_mut() {
            if entry.status == CacheStatus::Migrating {
                continue;
            }
            entry.status = if ledger.load_ratio(entry.host) > self.migration_threshold {
                CacheStatus::CandidateForMigration
            } else {
                CacheStatus::Stable
            };
        }
    }

    /// Apply the step's placement to the cache state
    ///
    /// On the first step this seeds the cache at the placement's devices.
    /// On later steps it relocates caches whose compute moved (when allowed),
    /// grows every cache by one token's worth of K/V, and keeps the ledger
    /// consistent: old bytes are released before new bytes are committed,
    /// all inside the caller's step transaction.
    pub fn apply(
        &self,
        step: usize,
        graph: &DeviceGraph,
        ledger: &mut ResourceLedger,
        cache: &mut CacheState,
        placement: &Placement,
        demands: &[LayerDemand],
    ) -> SimResult<MigrationOutcome> {
        if !cache.is_initialized() {
            return self.seed(step, ledger, cache, placement, demands);
        }

        let mut outcome = MigrationOutcome::default();
        let caches_move = self.caches_move();

        // Destination decision and state transitions, per layer.
        let mut new_hosts = Vec::with_capacity(cache.entries.len());
        for (layer, entry) in cache.entries.iter_mut().enumerate() {
            let target = placement.device_for(layer);
            if target == entry.host || !caches_move {
                if target != entry.host {
                    // Pinned cache serving remote compute.
                    let bw = graph
                        .path_bandwidth(entry.host, target)
                        .unwrap_or(f64::INFINITY);
                    outcome.remote_access_secs += demands[layer].activation_bytes as f64 / bw;
                }
                new_hosts.push(entry.host);
                continue;
            }

            // Colocation makes the move mandatory even for a layer whose
            // device never crossed the threshold; promote it first so the
            // state machine is traversed, not skipped.
            if entry.status == CacheStatus::Stable {
                entry.status = CacheStatus::CandidateForMigration;
            }
            entry.status = CacheStatus::Migrating;

            let bw = graph
                .path_bandwidth(entry.host, target)
                .unwrap_or(f64::INFINITY);
            outcome.events.push(MigrationEvent {
                layer,
                from: entry.host,
                to: target,
                bytes: entry.bytes,
                secs: entry.bytes as f64 / bw,
            });
            new_hosts.push(target);
        }

        // Ledger bookkeeping: release every cache's old footprint, then
        // commit the grown footprint at its (possibly new) host. Releasing
        // first keeps the placement pass's feasibility arithmetic exact.
        for entry in cache.entries.iter() {
            ledger.release(entry.host, entry.bytes, 0.0);
        }
        for (layer, entry) in cache.entries.iter_mut().enumerate() {
            let new_host = new_hosts[layer];
            let new_bytes = demands[layer].kv_bytes;
            if let Err(err) = ledger.try_commit(new_host, new_bytes, 0.0) {
                debug!(layer, new_host, %err, "cache commit refused");
                return Err(SimError::MigrationFailed {
                    step,
                    layer,
                    destination: new_host,
                });
            }
            if entry.status == CacheStatus::Migrating {
                debug!(
                    layer,
                    from = entry.host,
                    to = new_host,
                    bytes = entry.bytes,
                    "cache migrated"
                );
                entry.status = CacheStatus::Stable;
            }
            entry.host = new_host;
            entry.bytes = new_bytes;
        }

        Ok(outcome)
    }

    /// First-step initialization: caches appear at the placement's devices
    fn seed(
        &self,
        step: usize,
        ledger: &mut ResourceLedger,
        cache: &mut CacheState,
        placement: &Placement,
        demands: &[LayerDemand],
    ) -> SimResult<MigrationOutcome> {
        for (layer, demand) in demands.iter().enumerate() {
            let host = placement.device_for(layer);
            if let Err(err) = ledger.try_commit(host, demand.kv_bytes, 0.0) {
                debug!(layer, host, %err, "initial cache commit refused");
                return Err(SimError::MigrationFailed {
                    step,
                    layer,
                    destination: host,
                });
            }
            cache.entries.push(CacheEntry {
                host,
                bytes: demand.kv_bytes,
                status: CacheStatus::Stable,
            });
        }
        Ok(MigrationOutcome::default())
    }
}
