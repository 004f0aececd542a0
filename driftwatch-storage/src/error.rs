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

//! Storage error types

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the state store and the detector.
///
/// `NotFound` and `BadStoredValue` are per-key conditions; `Unavailable`
/// covers I/O failure in the underlying store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,

    #[error("invalid stored record: {0:?}")]
    BadStoredValue(String),

    #[error("store unavailable: {0}")]
    Unavailable(#[from] sled::Error),
}
