use serde::{Deserialize, Serialize};

use super::TubeName;

/// Point-in-time view of one tube.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TubeStats {
    pub name: TubeName,

    // current depth per lifecycle set
    pub ready: usize,
    pub delayed: usize,
    pub reserved: usize,
    pub buried: usize,

    // lifetime counters
    pub submitted: u64,
    pub reserved_total: u64,
    pub reclaimed: u64,
    pub finished: u64,
    pub buried_total: u64,
    pub kicked: u64,
}

impl TubeStats {
    pub fn new(name: TubeName) -> Self {
        Self {
            name,
            ready: 0,
            delayed: 0,
            reserved: 0,
            buried: 0,
            submitted: 0,
            reserved_total: 0,
            reclaimed: 0,
            finished: 0,
            buried_total: 0,
            kicked: 0,
        }
    }

    /// Live messages in any state.
    pub fn total(&self) -> usize {
        self.ready + self.delayed + self.reserved + self.buried
    }
}
