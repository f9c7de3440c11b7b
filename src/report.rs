use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::budget::{Budget, Violation};
use crate::metrics::{now_millis, Metric};
use crate::scoring::Score;

/// The outcome of one collection cycle. Immutable once built; this is the unit
/// that gets stored and shipped to reporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub timestamp: i64,
    pub url: String,
    pub metrics: Vec<Metric>,
    pub budget: Budget,
    pub violations: Vec<Violation>,
    pub score: Score,
}

impl Report {
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

/// `perf_<epoch-ms>_<9 lowercase base36 chars>`
pub fn generate_report_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|b| (b as char).to_ascii_lowercase())
        .take(9)
        .collect();
    format!("perf_{}_{}", now_millis(), suffix)
}
