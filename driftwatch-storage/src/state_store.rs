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

//! Persisted estimator state: one `(avg, std, count)` record per
//! `(metric, phase grid)` key.
//!
//! Records are stored as ASCII `"<avg:.5> <std:.5> <count>"` so a later
//! process re-reading the same bytes reproduces identical state. Keys are
//! `"<name>:<grid>x<num_grids>-<grid_no>"`; bucketing by phase within the
//! period compares each observation against same-phase history only.

use std::path::Path;

use crate::error::{Result, StoreError};

/// One persisted estimator state record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateRecord {
    /// Exponentially weighted moving average
    pub avg: f64,
    /// Exponentially weighted moving standard deviation, never negative
    pub std: f64,
    /// Warm-up counter, saturates at the configured start size
    pub count: i32,
}

impl StateRecord {
    /// State written the first time a key is seen.
    pub fn init(value: f64) -> Self {
        Self {
            avg: value,
            std: 0.0,
            count: 0,
        }
    }

    /// Serialize to the on-disk ASCII form, 5 decimal places.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{:.5} {:.5} {}", self.avg, self.std, self.count).into_bytes()
    }

    /// Parse the on-disk ASCII form.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| StoreError::BadStoredValue(String::from_utf8_lossy(data).into_owned()))?;
        let bad = || StoreError::BadStoredValue(text.to_string());
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() != 3 {
            return Err(bad());
        }
        Ok(Self {
            avg: words[0].parse().map_err(|_| bad())?,
            std: words[1].parse().map_err(|_| bad())?,
            count: words[2].parse().map_err(|_| bad())?,
        })
    }
}

/// Derive the state key for an observation.
///
/// `grid_no` is the phase slot of `stamp` within the `grid * num_grids`
/// second period. Pre-epoch stamps use the Euclidean remainder so the slot
/// stays in range.
pub fn state_key(name: &str, stamp: i64, grid: u32, num_grids: u32) -> String {
    let period = i64::from(grid) * i64::from(num_grids);
    let grid_no = stamp.rem_euclid(period) / i64::from(grid);
    format!("{name}:{grid}x{num_grids}-{grid_no}")
}

/// Ordered byte-map of state records, backed by sled.
///
/// Only `get`-style loads and last-write-wins saves are used; there is no
/// iteration and records are never deleted in normal operation.
#[derive(Debug)]
pub struct StateStore {
    db: sled::Db,
}

impl StateStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// Load the record under `key`, distinguishing a missing key from a
    /// corrupt or unreadable one.
    pub fn load(&self, key: &str) -> Result<StateRecord> {
        match self.db.get(key.as_bytes())? {
            Some(data) => StateRecord::parse(&data),
            None => Err(StoreError::NotFound),
        }
    }

    /// Write the record under `key`, replacing any previous value.
    pub fn save(&self, key: &str, record: &StateRecord) -> Result<()> {
        self.db.insert(key.as_bytes(), record.to_bytes())?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn save_raw(&self, key: &str, data: &[u8]) -> Result<()> {
        self.db.insert(key.as_bytes(), data)?;
        Ok(())
    }
}
