//! Closed-form per-layer demand model
//!
//! Converts a (model type, sequence length, generation step) tuple into one
//! [`LayerDemand`] per transformer layer, in pipeline order. The model does
//! not execute anything; it derives abstract memory/compute/communication
//! figures the placement engine optimizes over. Deterministic given its
//! inputs, so identical runs yield identical traces.

use serde::Serialize;

use crate::config::{ModelType, WorkloadConfig};
use crate::error::{SimError, SimResult};

/// Resource demand of one pipeline layer for one generation step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerDemand {
    /// Layer index in pipeline order
    pub layer: usize,
    /// Weight bytes resident while the layer computes
    pub weight_bytes: u64,
    /// KV cache bytes accumulated up to this step
    pub kv_bytes: u64,
    /// FLOPs to produce one token at this step
    pub compute_flops: f64,
    /// Bytes of activation crossing the boundary to the next layer
    pub activation_bytes: u64,
}

impl LayerDemand {
    /// Total memory footprint when compute and cache are colocated
    pub fn memory_bytes(&self) -> u64 {
        self.weight_bytes + self.kv_bytes
    }
}

/// Demand generator for a fixed model shape and numeric precision
#[derive(Debug, Clone)]
pub struct WorkloadModel {
    model_type: ModelType,
    precision_bytes: usize,
}

impl WorkloadModel {
    pub fn new(model_type: ModelType, precision_bytes: usize) -> SimResult<Self> {
        if precision_bytes == 0 {
            return Err(SimError::InvalidConfiguration(
                "precision_bytes must be > 0".into(),
            ));
        }
        Ok(WorkloadModel {
            model_type,
            precision_bytes,
        })
    }

    pub fn from_config(config: &WorkloadConfig) -> SimResult<Self> {
        config.validate()?;
        Self::new(config.model_type, config.precision_bytes)
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn num_layers(&self) -> usize {
        self.model_type.num_layers()
    }

    /// KV cache bytes for one layer at `sequence_length + step_index` tokens
    ///
    /// precision_bytes × num_heads × head_dim × (initial_sequence_length + t)
    pub fn kv_bytes(&self, sequence_length: usize, step_index: usize) -> u64 {
        (self.precision_bytes
            * self.model_type.num_heads()
            * self.model_type.head_dim()
            * (sequence_length + step_index)) as u64
    }

    /// Weight bytes per layer: QKV + output projections (4d²) and the MLP
    /// block (8d²)
    pub fn weight_bytes(&self) -> u64 {
        let d = self.model_type.embed_dim() as u64;
        12 * d * d * self.precision_bytes as u64
    }

    /// FLOPs per generated token: projection/MLP matmuls (2 FLOPs per
    /// weight) plus attention over the accumulated context
    pub fn compute_flops(&self, sequence_length: usize, step_index: usize) -> f64 {
        let d = self.model_type.embed_dim() as f64;
        let context = (sequence_length + step_index) as f64;
        24.0 * d * d + 4.0 * d * context
    }

    /// Bytes of one token's hidden state crossing a pipeline boundary
    pub fn activation_bytes(&self) -> u64 {
        (self.precision_bytes * self.model_type.embed_dim()) as u64
    }

    /// Per-layer demands for one generation step, in pipeline order
    pub fn demands_for(&self, sequence_length: usize, step_index: usize) -> Vec<LayerDemand> {
        let weight_bytes = self.weight_bytes();
        let kv_bytes = self.kv_bytes(sequence_length, step_index);
        let compute_flops = self.compute_flops(sequence_length, step_index);
        let activation_bytes = self.activation_bytes();
        (0..self.num_layers())
            .map(|layer| LayerDemand {
                layer,
                weight_bytes,
                kv_bytes,
                compute_flops,
                activation_bytes,
            })
            .collect()
    }
}
