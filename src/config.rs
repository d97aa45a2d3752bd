//! Typed configuration surface for the simulator
//!
//! The embedding experiment harness parses YAML/JSON into these types; this
//! crate only defines them and validates them. All enumerations are closed:
//! an unknown `model_type` or `cache_placement_strategy` string is a
//! deserialization error, never a silent fallback.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{SimError, SimResult};

/// Transformer model size tier
///
/// Each tier fixes the model shape used by the closed-form demand model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelType {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl ModelType {
    pub fn num_layers(self) -> usize {
        match self {
            ModelType::Small => 12,
            ModelType::Medium => 24,
            ModelType::Large => 32,
            ModelType::ExtraLarge => 48,
        }
    }

    pub fn num_heads(self) -> usize {
        match self {
            ModelType::Small => 12,
            ModelType::Medium => 16,
            ModelType::Large => 32,
            ModelType::ExtraLarge => 64,
        }
    }

    pub fn head_dim(self) -> usize {
        match self {
            ModelType::Small => 64,
            ModelType::Medium => 64,
            ModelType::Large => 128,
            ModelType::ExtraLarge => 128,
        }
    }

    pub fn embed_dim(self) -> usize {
        self.num_heads() * self.head_dim()
    }
}

/// Where a layer's KV cache may live relative to its compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CachePlacementStrategy {
    /// Cache must share a device with the layer's compute for the step
    #[default]
    Colocated,
    /// Cache stays where it is; only weights follow the compute.
    /// Configuration extension point, not exercised by current experiments.
    Decoupled,
}

/// Placement search engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    /// Exhaustive search, bounded by `backtrack_limit`. Small device counts.
    Exact,
    /// Greedy marginal-cost assignment with one local-search pass.
    #[default]
    Heuristic,
}

/// Workload descriptor consumed by the demand model and the driver
///
/// `initial_sequence_lengths` and `generation_steps` are parallel arrays:
/// segment `i` starts from sequence length `initial_sequence_lengths[i]`
/// and generates `generation_steps[i]` tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub model_type: ModelType,
    pub initial_sequence_lengths: Vec<usize>,
    pub generation_steps: Vec<usize>,
    pub precision_bytes: usize,
}

impl WorkloadConfig {
    pub fn new(model_type: ModelType) -> Self {
        WorkloadConfig {
            model_type,
            initial_sequence_lengths: vec![128],
            generation_steps: vec![32],
            precision_bytes: 4,
        }
    }

    pub fn with_segments(
        mut self,
        initial_sequence_lengths: Vec<usize>,
        generation_steps: Vec<usize>,
    ) -> Self {
        self.initial_sequence_lengths = initial_sequence_lengths;
        self.generation_steps = generation_steps;
        self
    }

    pub fn with_precision_bytes(mut self, precision_bytes: usize) -> Self {
        self.precision_bytes = precision_bytes;
        self
    }

    /// Total number of generation steps across all segments
    pub fn total_steps(&self) -> usize {
        self.generation_steps.iter().sum()
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.initial_sequence_lengths.is_empty() {
            return Err(SimError::InvalidConfiguration(
                "initial_sequence_lengths must not be empty".into(),
            ));
        }
        if self.generation_steps.len() != self.initial_sequence_lengths.len() {
            return Err(SimError::InvalidConfiguration(format!(
                "generation_steps has {} entries but initial_sequence_lengths has {}",
                self.generation_steps.len(),
                self.initial_sequence_lengths.len()
            )));
        }
        if self.initial_sequence_lengths.iter().any(|&l| l == 0) {
            return Err(SimError::InvalidConfiguration(
                "initial_sequence_lengths entries must be > 0".into(),
            ));
        }
        if self.generation_steps.iter().any(|&s| s == 0) {
            return Err(SimError::InvalidConfiguration(
                "generation_steps entries must be > 0".into(),
            ));
        }
        if self.precision_bytes == 0 {
            return Err(SimError::InvalidConfiguration(
                "precision_bytes must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Algorithm parameter block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    /// Combined load ratio above which a device's cached layers become
    /// migration candidates. Must lie in (0, 1].
    pub migration_threshold: f64,
    /// Ceiling on backtrack steps explored by exact-mode search
    pub backtrack_limit: usize,
    pub cache_placement_strategy: CachePlacementStrategy,
    /// When false, threshold checks are skipped and caches stay pinned to
    /// their initial placement for the whole run.
    pub enable_dynamic_adjustment: bool,
    pub placement_mode: PlacementMode,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        AlgorithmConfig {
            migration_threshold: 0.9,
            backtrack_limit: 100,
            cache_placement_strategy: CachePlacementStrategy::Colocated,
            enable_dynamic_adjustment: true,
            placement_mode: PlacementMode::Heuristic,
        }
    }
}

impl AlgorithmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_migration_threshold(mut self, migration_threshold: f64) -> Self {
        self.migration_threshold = migration_threshold;
        self
    }

    pub fn with_backtrack_limit(mut self, backtrack_limit: usize) -> Self {
        self.backtrack_limit = backtrack_limit;
        self
    }

    pub fn with_cache_placement_strategy(mut self, strategy: CachePlacementStrategy) -> Self {
        self.cache_placement_strategy = strategy;
        self
    }

    pub fn with_dynamic_adjustment(mut self, enabled: bool) -> Self {
        self.enable_dynamic_adjustment = enabled;
        self
    }

    pub fn with_placement_mode(mut self, placement_mode: PlacementMode) -> Self {
        self.placement_mode = placement_mode;
        self
    }

    pub fn validate(&self) -> SimResult<()> {
        if !(self.migration_threshold > 0.0 && self.migration_threshold <= 1.0) {
            return Err(SimError::InvalidConfiguration(format!(
                "migration_threshold must be in (0, 1], got {}",
                self.migration_threshold
            )));
        }
        Ok(())
    }
}

/// Experiment-level run parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub name: String,
    pub num_runs: usize,
    /// Wall-clock budget per run, checked between steps only
    #[serde(default, with = "duration_secs")]
    pub time_limit: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            name: "default_experiment".to_string(),
            num_runs: 1,
            time_limit: None,
        }
    }
}

impl RunConfig {
    pub fn new(name: impl Into<String>) -> Self {
        RunConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_num_runs(mut self, num_runs: usize) -> Self {
        self.num_runs = num_runs;
        self
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = Some(time_limit);
        self
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.num_runs == 0 {
            return Err(SimError::InvalidConfiguration(
                "num_runs must be >= 1".into(),
            ));
        }
        if let Some(limit) = self.time_limit {
            if limit.is_zero() {
                return Err(SimError::InvalidConfiguration(
                    "time_limit must be > 0".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Serialize `Option<Duration>` as fractional seconds, matching the
/// experiment file format.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs: Option<f64> = Option::deserialize(deserializer)?;
        match secs {
            Some(s) if s.is_finite() && s > 0.0 => Ok(Some(Duration::from_secs_f64(s))),
            Some(_) => Ok(None),
            None => Ok(None),
        }
    }
}
