//! Device graph: the immutable network the simulation runs over
//!
//! A [`DeviceGraph`] holds the devices (memory and compute capacities) and
//! the links between them (bandwidth). It is built once per experiment run
//! from the externally generated topology and never mutated afterwards;
//! live occupancy lives in [`crate::ledger::ResourceLedger`].
//!
//! Path bandwidths are precomputed all-pairs at construction: for each pair
//! of devices the bottleneck bandwidth along a minimum-hop path (the widest
//! such path when several minimum-hop paths exist).

use std::collections::VecDeque;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("device graph has no devices")]
    Empty,
    #[error("device {0} has non-positive capacity")]
    InvalidCapacity(usize),
    #[error("link ({0}, {1}) references an unknown device")]
    UnknownDevice(usize, usize),
    #[error("link ({0}, {0}) is a self-loop")]
    SelfLoop(usize),
    #[error("duplicate link between devices {0} and {1}")]
    DuplicateLink(usize, usize),
    #[error("link ({0}, {1}) has non-positive bandwidth")]
    InvalidBandwidth(usize, usize),
    #[error("device graph is disconnected: device {0} is unreachable from device 0")]
    Disconnected(usize),
}

pub type TopologyResult<T> = Result<T, TopologyError>;

/// A single device in the network
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Index into the graph's device table
    pub id: usize,
    /// Memory capacity in bytes
    pub memory_capacity: u64,
    /// Compute capacity in FLOPS
    pub compute_capacity: f64,
}

impl Device {
    pub fn new(id: usize, memory_capacity: u64, compute_capacity: f64) -> Self {
        Device {
            id,
            memory_capacity,
            compute_capacity,
        }
    }
}

/// An undirected link between two devices
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub a: usize,
    pub b: usize,
    /// Bandwidth in bytes per second
    pub bandwidth: f64,
}

impl Link {
    pub fn new(a: usize, b: usize, bandwidth: f64) -> Self {
        Link { a, b, bandwidth }
    }
}

/// Immutable device network
///
/// Construction validates the topology (simple graph, positive capacities
/// and bandwidths, connected) and precomputes all-pairs path bandwidths.
#[derive(Debug, Clone)]
pub struct DeviceGraph {
    devices: Vec<Device>,
    adjacency: Vec<Vec<(usize, f64)>>,
    // path_bw[a * n + b]: bottleneck bandwidth of the widest minimum-hop
    // path from a to b. INFINITY on the diagonal.
    path_bw: Vec<f64>,
}

impl DeviceGraph {
    pub fn new(devices: Vec<Device>, links: Vec<Link>) -> TopologyResult<Self> {
        if devices.is_empty() {
            return Err(TopologyError::Empty);
        }
        for (i, d) in devices.iter().enumerate() {
            if d.memory_capacity == 0 || d.compute_capacity <= 0.0 {
                return Err(TopologyError::InvalidCapacity(i));
            }
        }

        let n = devices.len();
        let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for link in &links {
            if link.a >= n || link.b >= n {
                return Err(TopologyError::UnknownDevice(link.a, link.b));
            }
            if link.a == link.b {
                return Err(TopologyError::SelfLoop(link.a));
            }
            if link.bandwidth <= 0.0 {
                return Err(TopologyError::InvalidBandwidth(link.a, link.b));
            }
            if adjacency[link.a].iter().any(|&(d, _)| d == link.b) {
                return Err(TopologyError::DuplicateLink(link.a, link.b));
            }
            adjacency[link.a].push((link.b, link.bandwidth));
            adjacency[link.b].push((link.a, link.bandwidth));
        }
        for neighbors in adjacency.iter_mut() {
            neighbors.sort_by_key(|&(d, _)| d);
        }

        let path_bw = compute_path_bandwidths(n, &adjacency);

        // Connectivity: every device must be reachable from device 0.
        if n > 1 {
            for b in 1..n {
                if path_bw[b] == 0.0 {
                    return Err(TopologyError::Disconnected(b));
                }
            }
        }

        Ok(DeviceGraph {
            devices,
            adjacency,
            path_bw,
        })
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, id: usize) -> &Device {
        &self.devices[id]
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Neighbors of a device with the direct link bandwidth to each
    pub fn neighbors(&self, device: usize) -> &[(usize, f64)] {
        &self.adjacency[device]
    }

    /// Bottleneck bandwidth along the widest minimum-hop path from a to b
    ///
    /// Returns `None` if the devices are not connected (cannot happen for a
    /// validated graph) and `f64::INFINITY` when `a == b`.
    pub fn path_bandwidth(&self, a: usize, b: usize) -> Option<f64> {
        let bw = self.path_bw[a * self.num_devices() + b];
        if bw == 0.0 {
            None
        } else {
            Some(bw)
        }
    }
}

/// BFS layering from each source; within the minimum-hop distance the widest
/// bottleneck is kept.
fn compute_path_bandwidths(n: usize, adjacency: &[Vec<(usize, f64)>]) -> Vec<f64> {
    let mut path_bw = vec![0.0f64; n * n];
    for src in 0..n {
        let mut dist = vec![usize::MAX; n];
        let mut width = vec![0.0f64; n];
        dist[src] = 0;
        width[src] = f64::INFINITY;
        let mut queue = VecDeque::new();
        queue.push_back(src);
        while let Some(u) = queue.pop_front() {
            for &(v, bw) in &adjacency[u] {
                let candidate = width[u].min(bw);
                if dist[v] == usize::MAX {
                    dist[v] = dist[u] + 1;
                    width[v] = candidate;
                    queue.push_back(v);
                } else if dist[v] == dist[u] + 1 && candidate > width[v] {
                    // Same hop count, wider path.
                    width[v] = candidate;
                }
            }
        }
        for dst in 0..n {
            path_bw[src * n + dst] = width[dst];
        }
    }
    path_bw
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_graph(n: usize, bandwidth: f64) -> DeviceGraph {
        let devices = (0..n).map(|i| Device::new(i, 1 << 30, 1e12)).collect();
        let links = (0..n - 1)
            .map(|i| Link::new(i, i + 1, bandwidth))
            .collect();
        DeviceGraph::new(devices, links).unwrap()
    }

    #[test]
    fn test_empty_graph_rejected() {
        let result = DeviceGraph::new(vec![], vec![]);
        assert!(matches!(result, Err(TopologyError::Empty)));
    }

    #[test]
    fn test_self_loop_rejected() {
        let devices = vec![Device::new(0, 1024, 1e9), Device::new(1, 1024, 1e9)];
        let links = vec![Link::new(0, 0, 1e9)];
        let result = DeviceGraph::new(devices, links);
        assert!(matches!(result, Err(TopologyError::SelfLoop(0))));
    }

    #[test]
    fn test_duplicate_link_rejected() {
        let devices = vec![Device::new(0, 1024, 1e9), Device::new(1, 1024, 1e9)];
        let links = vec![Link::new(0, 1, 1e9), Link::new(1, 0, 2e9)];
        let result = DeviceGraph::new(devices, links);
        assert!(matches!(result, Err(TopologyError::DuplicateLink(1, 0))));
    }

    #[test]
    fn test_disconnected_rejected() {
        let devices = vec![
            Device::new(0, 1024, 1e9),
            Device::new(1, 1024, 1e9),
            Device::new(2, 1024, 1e9),
        ];
        let links = vec![Link::new(0, 1, 1e9)];
        let result = DeviceGraph::new(devices, links);
        assert!(matches!(result, Err(TopologyError::Disconnected(2))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let devices = vec![Device::new(0, 0, 1e9)];
        let result = DeviceGraph::new(devices, vec![]);
        assert!(matches!(result, Err(TopologyError::InvalidCapacity(0))));
    }

    #[test]
    fn test_negative_bandwidth_rejected() {
        let devices = vec![Device::new(0, 1024, 1e9), Device::new(1, 1024, 1e9)];
        let links = vec![Link::new(0, 1, -1.0)];
        let result = DeviceGraph::new(devices, links);
        assert!(matches!(result, Err(TopologyError::InvalidBandwidth(0, 1))));
    }

    #[test]
    fn test_single_device_graph() {
        let devices = vec![Device::new(0, 1024, 1e9)];
        let graph = DeviceGraph::new(devices, vec![]).unwrap();
        assert_eq!(graph.num_devices(), 1);
        assert_eq!(graph.path_bandwidth(0, 0), Some(f64::INFINITY));
    }

    #[test]
    fn test_neighbors() {
        let graph = line_graph(3, 5e9);
        assert_eq!(graph.neighbors(0), &[(1, 5e9)]);
        assert_eq!(graph.neighbors(1), &[(0, 5e9), (2, 5e9)]);
    }

    #[test]
    fn test_path_bandwidth_bottleneck_on_line() {
        // 0 --10-- 1 --2-- 2: bottleneck from 0 to 2 is 2.
        let devices = vec![
            Device::new(0, 1024, 1e9),
            Device::new(1, 1024, 1e9),
            Device::new(2, 1024, 1e9),
        ];
        let links = vec![Link::new(0, 1, 10.0), Link::new(1, 2, 2.0)];
        let graph = DeviceGraph::new(devices, links).unwrap();
        assert_eq!(graph.path_bandwidth(0, 2), Some(2.0));
        assert_eq!(graph.path_bandwidth(2, 0), Some(2.0));
        assert_eq!(graph.path_bandwidth(0, 1), Some(10.0));
    }

    #[test]
    fn test_path_bandwidth_prefers_wider_equal_hop_path() {
        // Two 2-hop paths from 0 to 3: via 1 (min bw 3) and via 2 (min bw 7).
        let devices = (0..4).map(|i| Device::new(i, 1024, 1e9)).collect();
        let links = vec![
            Link::new(0, 1, 3.0),
            Link::new(1, 3, 9.0),
            Link::new(0, 2, 7.0),
            Link::new(2, 3, 8.0),
        ];
        let graph = DeviceGraph::new(devices, links).unwrap();
        assert_eq!(graph.path_bandwidth(0, 3), Some(7.0));
    }

    #[test]
    fn test_path_bandwidth_minimum_hop_wins_over_wider_detour() {
        // Direct narrow link 0-1 (bw 1) and a wide 2-hop detour via 2.
        // Minimum-hop routing takes the direct link.
        let devices = (0..3).map(|i| Device::new(i, 1024, 1e9)).collect();
        let links = vec![
            Link::new(0, 1, 1.0),
            Link::new(0, 2, 100.0),
            Link::new(2, 1, 100.0),
        ];
        let graph = DeviceGraph::new(devices, links).unwrap();
        assert_eq!(graph.path_bandwidth(0, 1), Some(1.0));
    }

    #[test]
    fn test_graph_is_symmetric() {
        let graph = line_graph(5, 4e9);
        for a in 0..5 {
            for b in 0..5 {
                assert_eq!(graph.path_bandwidth(a, b), graph.path_bandwidth(b, a));
            }
        }
    }
}
