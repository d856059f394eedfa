use serde::{Deserialize, Serialize};

/// How per-time-step cost nodes are merged into the single scalar cost of an
/// unrolled graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostAggregation {
    /// Average the per-step costs (default).
    Mean,
    /// Sum the per-step costs.
    Sum,
}

/// Construction-time configuration, threaded explicitly instead of living in
/// process-global state so that independent graphs and tests do not interfere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Seed for the graph-owned random stream (weight init, dropout masks).
    pub seed: u64,
    /// Aggregation rule applied to per-step costs during unrolling.
    pub cost_aggregation: CostAggregation,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            seed: 11,
            cost_aggregation: CostAggregation::Mean,
        }
    }
}

impl GraphConfig {
    pub fn with_seed(seed: u64) -> Self {
        GraphConfig {
            seed,
            ..Default::default()
        }
    }
}
