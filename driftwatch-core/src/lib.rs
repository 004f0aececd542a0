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

//! Driftwatch Core
//!
//! Stat records, the line-oriented wire codec, and metric admission
//! filtering shared by the detector daemon and its clients.

pub mod error;
pub mod filter;
pub mod stat;
pub mod wire;

pub use error::{Error, Result};
pub use filter::MetricFilter;
pub use stat::{Stat, ANOMALY_THRESHOLD};
pub use wire::{format_sub_line, parse_pub_line, parse_sub_line, Mode, MAX_LINE_LEN};
