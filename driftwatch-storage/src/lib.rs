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

//! Driftwatch Storage
//!
//! Persistent per-key estimator state and the online anomaly detector
//! that reads and rewrites it.

pub mod detector;
pub mod error;
pub mod state_store;

pub use detector::{Detector, DetectorConfig};
pub use error::{Result, StoreError};
pub use state_store::{state_key, StateRecord, StateStore};
