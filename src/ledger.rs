//! Resource ledger: live memory/compute occupancy per device
//!
//! The ledger is the only mutation point within a run. Commits are made
//! through [`LedgerTransaction`], which records every tentative commit made
//! during one step's placement pass and rolls all of them back if the
//! transaction is dropped without [`LedgerTransaction::commit`]. A step
//! therefore either fully commits a valid placement or leaves the ledger
//! untouched.

use thiserror::Error;

use crate::graph::DeviceGraph;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(
        "device {device} exhausted: requested {requested_bytes}B/{requested_flops} FLOPS, \
         available {available_bytes}B/{available_flops} FLOPS"
    )]
    ResourceExhausted {
        device: usize,
        requested_bytes: u64,
        available_bytes: u64,
        requested_flops: f64,
        available_flops: f64,
    },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Per-device occupancy tracker
///
/// Invariant: `used <= capacity` for every device after any committed
/// operation.
#[derive(Debug, Clone)]
pub struct ResourceLedger {
    memory_capacity: Vec<u64>,
    compute_capacity: Vec<f64>,
    memory_used: Vec<u64>,
    compute_committed: Vec<f64>,
}

impl ResourceLedger {
    pub fn new(graph: &DeviceGraph) -> Self {
        let n = graph.num_devices();
        ResourceLedger {
            memory_capacity: graph.devices().iter().map(|d| d.memory_capacity).collect(),
            compute_capacity: graph.devices().iter().map(|d| d.compute_capacity).collect(),
            memory_used: vec![0; n],
            compute_committed: vec![0.0; n],
        }
    }

    pub fn num_devices(&self) -> usize {
        self.memory_capacity.len()
    }

    /// Commit memory and compute on a device, or fail without side effects
    pub fn try_commit(
        &mut self,
        device: usize,
        memory_bytes: u64,
        compute_flops: f64,
    ) -> LedgerResult<()> {
        let mem_available = self.memory_capacity[device] - self.memory_used[device];
        let flops_available =
            (self.compute_capacity[device] - self.compute_committed[device]).max(0.0);
        if memory_bytes > mem_available || compute_flops > flops_available {
            return Err(LedgerError::ResourceExhausted {
                device,
                requested_bytes: memory_bytes,
                available_bytes: mem_available,
                requested_flops: compute_flops,
                available_flops: flops_available,
            });
        }
        self.memory_used[device] += memory_bytes;
        self.compute_committed[device] += compute_flops;
        Ok(())
    }

    /// Release previously committed resources (saturating)
    pub fn release(&mut self, device: usize, memory_bytes: u64, compute_flops: f64) {
        self.memory_used[device] = self.memory_used[device].saturating_sub(memory_bytes);
        self.compute_committed[device] = (self.compute_committed[device] - compute_flops).max(0.0);
    }

    /// Current occupancy of a device: (memory bytes used, compute committed)
    pub fn current_load(&self, device: usize) -> (u64, f64) {
        (self.memory_used[device], self.compute_committed[device])
    }

    pub fn memory_capacity(&self, device: usize) -> u64 {
        self.memory_capacity[device]
    }

    pub fn compute_capacity(&self, device: usize) -> f64 {
        self.compute_capacity[device]
    }

    pub fn memory_available(&self, device: usize) -> u64 {
        self.memory_capacity[device] - self.memory_used[device]
    }

    pub fn compute_available(&self, device: usize) -> f64 {
        (self.compute_capacity[device] - self.compute_committed[device]).max(0.0)
    }

    /// Combined load ratio of a device, memory and compute weighted equally
    ///
    /// The migration threshold is a single scalar, so the two resources are
    /// blended 50/50 into one ratio in [0, 1].
    pub fn load_ratio(&self, device: usize) -> f64 {
        let mem_ratio = self.memory_used[device] as f64 / self.memory_capacity[device] as f64;
        let compute_ratio = self.compute_committed[device] / self.compute_capacity[device];
        0.5 * mem_ratio + 0.5 * compute_ratio
    }

    /// Begin a transactional scope for one step's placement pass
    pub fn transaction(&mut self) -> LedgerTransaction<'_> {
        LedgerTransaction {
            ledger: self,
            commits: Vec::new(),
            releases: Vec::new(),
            committed: false,
        }
    }
}

/// Records commits and releases made during one step and undoes all of them
/// on drop unless committed.
#[derive(Debug)]
pub struct LedgerTransaction<'a> {
    ledger: &'a mut ResourceLedger,
    commits: Vec<(usize, u64, f64)>,
    releases: Vec<(usize, u64, f64)>,
    committed: bool,
}

impl<'a> LedgerTransaction<'a> {
    /// Tentatively commit resources on a device within this transaction
    pub fn try_commit(
        &mut self,
        device: usize,
        memory_bytes: u64,
        compute_flops: f64,
    ) -> LedgerResult<()> {
        self.ledger.try_commit(device, memory_bytes, compute_flops)?;
        self.commits.push((device, memory_bytes, compute_flops));
        Ok(())
    }

    /// Release resources within this transaction (restored on rollback)
    ///
    /// Records the amounts actually subtracted, not the requested amounts,
    /// so rolling back an oversized release cannot push usage past capacity.
    pub fn release(&mut self, device: usize, memory_bytes: u64, compute_flops: f64) {
        let (memory_used, flops_used) = self.ledger.current_load(device);
        let memory_delta = memory_bytes.min(memory_used);
        let flops_delta = compute_flops.min(flops_used);
        self.ledger.release(device, memory_delta, flops_delta);
        self.releases.push((device, memory_delta, flops_delta));
    }

    /// Make all tentative commits and releases permanent
    pub fn commit(mut self) {
        self.committed = true;
    }

    pub fn ledger(&self) -> &ResourceLedger {
        self.ledger
    }
}

impl<'a> Drop for LedgerTransaction<'a> {
    fn drop(&mut self) {
        if !self.committed {
            for &(device, memory_bytes, compute_flops) in self.commits.iter().rev() {
                self.ledger.release(device, memory_bytes, compute_flops);
            }
            // Recorded release deltas never exceed what was committed at
            // the time, so restoring them cannot exceed capacity.
            for &(device, memory_bytes, compute_flops) in self.releases.iter().rev() {
                self.ledger.memory_used[device] += memory_bytes;
                self.ledger.compute_committed[device] += compute_flops;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Device, DeviceGraph, Link};

    fn two_device_graph() -> DeviceGraph {
        let devices = vec![Device::new(0, 1000, 100.0), Device::new(1, 500, 50.0)];
        let links = vec![Link::new(0, 1, 1e9)];
        DeviceGraph::new(devices, links).unwrap()
    }

    #[test]
    fn test_commit_and_release() {
        let graph = two_device_graph();
        let mut ledger = ResourceLedger::new(&graph);

        ledger.try_commit(0, 600, 40.0).unwrap();
        assert_eq!(ledger.current_load(0), (600, 40.0));
        assert_eq!(ledger.memory_available(0), 400);

        ledger.release(0, 600, 40.0);
        assert_eq!(ledger.current_load(0), (0, 0.0));
    }

    #[test]
    fn test_commit_over_capacity_fails_without_side_effects() {
        let graph = two_device_graph();
        let mut ledger = ResourceLedger::new(&graph);

        let result = ledger.try_commit(1, 501, 0.0);
        assert!(matches!(
            result,
            Err(LedgerError::ResourceExhausted { device: 1, .. })
        ));
        assert_eq!(ledger.current_load(1), (0, 0.0));

        let result = ledger.try_commit(1, 0, 51.0);
        assert!(result.is_err());
        assert_eq!(ledger.current_load(1), (0, 0.0));
    }

    #[test]
    fn test_release_saturates() {
        let graph = two_device_graph();
        let mut ledger = ResourceLedger::new(&graph);
        ledger.release(0, 100, 10.0);
        assert_eq!(ledger.current_load(0), (0, 0.0));
    }

    #[test]
    fn test_load_ratio_blends_memory_and_compute() {
        let graph = two_device_graph();
        let mut ledger = ResourceLedger::new(&graph);
        ledger.try_commit(0, 500, 0.0).unwrap();
        // 50% memory, 0% compute -> 0.25 combined.
        assert!((ledger.load_ratio(0) - 0.25).abs() < 1e-12);
        ledger.try_commit(0, 0, 50.0).unwrap();
        // 50% memory, 50% compute -> 0.5 combined.
        assert!((ledger.load_ratio(0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_transaction_rolls_back_on_drop() {
        let graph = two_device_graph();
        let mut ledger = ResourceLedger::new(&graph);

        {
            let mut txn = ledger.transaction();
            txn.try_commit(0, 300, 10.0).unwrap();
            txn.try_commit(1, 200, 5.0).unwrap();
            // Dropped uncommitted.
        }
        assert_eq!(ledger.current_load(0), (0, 0.0));
        assert_eq!(ledger.current_load(1), (0, 0.0));
    }

    #[test]
    fn test_transaction_commit_keeps_entries() {
        let graph = two_device_graph();
        let mut ledger = ResourceLedger::new(&graph);

        let mut txn = ledger.transaction();
        txn.try_commit(0, 300, 10.0).unwrap();
        txn.commit();

        assert_eq!(ledger.current_load(0), (300, 10.0));
    }

    #[test]
    fn test_oversized_release_rolls_back_within_capacity() {
        let graph = two_device_graph();
        let mut ledger = ResourceLedger::new(&graph);
        ledger.try_commit(0, 600, 40.0).unwrap();

        {
            let mut txn = ledger.transaction();
            // Requests more than is committed; the live ledger saturates.
            txn.release(0, 2_000, 500.0);
            assert_eq!(txn.ledger().current_load(0), (0, 0.0));
            // Dropped uncommitted.
        }

        assert_eq!(ledger.current_load(0), (600, 40.0));
        let (memory, flops) = ledger.current_load(0);
        assert!(memory <= ledger.memory_capacity(0));
        assert!(flops <= ledger.compute_capacity(0));
    }

    #[test]
    fn test_transaction_partial_failure_rolls_back_all() {
        let graph = two_device_graph();
        let mut ledger = ResourceLedger::new(&graph);

        {
            let mut txn = ledger.transaction();
            txn.try_commit(0, 900, 10.0).unwrap();
            let result = txn.try_commit(1, 600, 0.0);
            assert!(result.is_err());
            // Caller abandons the step: txn dropped uncommitted.
        }
        assert_eq!(ledger.current_load(0), (0, 0.0));
        assert_eq!(ledger.current_load(1), (0, 0.0));
    }

    #[test]
    fn test_used_never_exceeds_capacity() {
        let graph = two_device_graph();
        let mut ledger = ResourceLedger::new(&graph);

        for _ in 0..10 {
            let _ = ledger.try_commit(0, 300, 30.0);
        }
        let (mem, flops) = ledger.current_load(0);
        assert!(mem <= ledger.memory_capacity(0));
        assert!(flops <= ledger.compute_capacity(0));
    }
}
