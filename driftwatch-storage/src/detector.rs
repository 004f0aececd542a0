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

//! Online anomaly detector.
//!
//! Maintains an exponentially weighted moving average and standard
//! deviation per `(metric, phase grid)` key and scores each observation
//! against them. A score is the distance from the post-update mean,
//! normalized by three standard deviations, so `|score| >= 1` marks the
//! 3-sigma boundary.
//!
//! The read-modify-write on a key must be atomic under concurrent
//! publishers; keys are hashed onto a fixed set of shard locks and the
//! lock is held across the whole update.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;
use tracing::warn;

use driftwatch_core::Stat;

use crate::error::{Result, StoreError};
use crate::state_store::{state_key, StateRecord, StateStore};

/// Number of key-hash shards guarding concurrent state updates.
const NUM_SHARDS: usize = 64;

/// Estimator parameters, taken from the detector section of the config.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// EWMA weight given to the incoming sample, in (0, 1)
    pub factor: f64,
    /// When false, soften the sample toward the prior mean before updating
    pub strict: bool,
    /// Observations a key must accumulate before scoring starts
    pub start_size: i32,
    /// Phase grid length, seconds
    pub grid: u32,
    /// Number of grids per period
    pub num_grids: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            factor: 0.07,
            strict: true,
            start_size: 32,
            grid: 480,
            num_grids: 180,
        }
    }
}

/// The per-key online estimator over a [`StateStore`].
#[derive(Debug)]
pub struct Detector {
    store: StateStore,
    config: DetectorConfig,
    shards: Vec<Mutex<()>>,
}

impl Detector {
    pub fn new(store: StateStore, config: DetectorConfig) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Mutex::new(())).collect();
        Self {
            store,
            config,
            shards,
        }
    }

    /// Score one admitted observation, updating the persisted state for its
    /// key and filling in `stat.anoma`, `stat.avg_old` and `stat.avg_new`.
    ///
    /// A corrupt stored record re-seeds the key from this observation and
    /// surfaces as `BadStoredValue`; the caller skips the line and the next
    /// observation proceeds from the fresh record.
    pub fn detect(&self, stat: &mut Stat) -> Result<()> {
        let key = state_key(
            &stat.name,
            stat.stamp,
            self.config.grid,
            self.config.num_grids,
        );
        let _guard = self.shards[shard_of(&key)].lock();

        let prior = match self.store.load(&key) {
            Ok(record) => Some(record),
            Err(StoreError::NotFound) => None,
            Err(err @ StoreError::BadStoredValue(_)) => {
                warn!("re-seeding corrupt state under {key}");
                self.store.save(&key, &StateRecord::init(stat.value))?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let (record, avg_old, anoma) = match prior {
            None => (StateRecord::init(stat.value), 0.0, 0.0),
            Some(prior) => self.update(prior, stat.value),
        };
        self.store.save(&key, &record)?;

        stat.anoma = anoma;
        stat.avg_old = avg_old;
        stat.avg_new = record.avg;
        Ok(())
    }

    /// One EWMA/EWMSD step over an existing record.
    ///
    /// Returns the record to persist, the prior mean, and the anomaly score
    /// (0 during warm-up or when the score is not finite).
    fn update(&self, prior: StateRecord, value: f64) -> (StateRecord, f64, f64) {
        let f = self.config.factor;
        let avg_old = prior.avg;

        let mut v = value;
        if !self.config.strict {
            v = (v + avg_old) / 2.0;
        }

        let avg_new = (1.0 - f) * avg_old + f * v;
        // Welford-style recurrence for exponential weighting; the product
        // term is non-negative because avg_new lies between avg_old and v,
        // the max guards float round-off.
        let variance = (1.0 - f) * prior.std * prior.std + f * (v - avg_old) * (v - avg_new);
        let std_new = variance.max(0.0).sqrt();

        let (count, anoma) = if prior.count < self.config.start_size {
            (prior.count + 1, 0.0)
        } else {
            let score = (value - avg_new) / (3.0 * std_new);
            (prior.count, if score.is_finite() { score } else { 0.0 })
        };

        (
            StateRecord {
                avg: avg_new,
                std: std_new,
                count,
            },
            avg_old,
            anoma,
        )
    }
}

fn shard_of(key: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % NUM_SHARDS
}
