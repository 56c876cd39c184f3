use serde::{Deserialize, Serialize};

/// Coarse network-quality label used to scale polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkCondition {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl NetworkCondition {
    /// Multiplier applied to every polling interval under this condition.
    pub fn interval_multiplier(&self) -> f64 {
        match self {
            NetworkCondition::Excellent => 1.0,
            NetworkCondition::Good => 1.5,
            NetworkCondition::Fair => 2.0,
            NetworkCondition::Poor => 3.0,
        }
    }
}
