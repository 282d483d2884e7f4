//! Status - broker 全体の状態ビュー
//!
//! tube ごとの `TubeStats` と、その合計を JSON で出せる形にまとめる。

use serde::{Deserialize, Serialize};

use crate::domain::{TubeName, TubeStats};

/// Messages per lifecycle set, summed over tubes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub ready: usize,
    pub delayed: usize,
    pub reserved: usize,
    pub buried: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.ready + self.delayed + self.reserved + self.buried
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStatus {
    pub tubes: Vec<TubeStats>,
    pub totals: StateCounts,
}

impl BrokerStatus {
    pub fn from_tubes(tubes: Vec<TubeStats>) -> Self {
        let totals = tubes.iter().fold(StateCounts::default(), |acc, t| StateCounts {
            ready: acc.ready + t.ready,
            delayed: acc.delayed + t.delayed,
            reserved: acc.reserved + t.reserved,
            buried: acc.buried + t.buried,
        });
        Self { tubes, totals }
    }

    pub fn tube(&self, name: &TubeName) -> Option<&TubeStats> {
        self.tubes.iter().find(|t| &t.name == name)
    }
}
