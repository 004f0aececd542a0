// Copyright 2025 Driftwatch Contributors (https://github.com/driftwatch/driftwatch)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The stat record: one named numeric observation plus the fields the
//! detector derives for it.

/// Absolute anomaly score at or above which a stat is broadcast.
///
/// Scores are normalized by three standard deviations, so 1.0 marks the
/// 3-sigma boundary.
pub const ANOMALY_THRESHOLD: f64 = 1.0;

/// A single observation travelling through the detection cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Stat {
    /// Metric name (non-empty, no whitespace)
    pub name: String,
    /// Observation timestamp, seconds since epoch
    pub stamp: i64,
    /// Observed value
    pub value: f64,
    /// Anomaly score; 0 until the key has enough history
    pub anoma: f64,
    /// Stored mean before this observation was applied
    pub avg_old: f64,
    /// Stored mean after this observation was applied
    pub avg_new: f64,
}

impl Stat {
    pub fn new(name: impl Into<String>, stamp: i64, value: f64) -> Self {
        Self {
            name: name.into(),
            stamp,
            value,
            anoma: 0.0,
            avg_old: 0.0,
            avg_new: 0.0,
        }
    }

    /// Whether this stat crosses the 3-sigma boundary and should fan out.
    pub fn is_anomalous(&self) -> bool {
        self.anoma.abs() >= ANOMALY_THRESHOLD
    }
}
