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

//! Metric admission by shell-glob white/black lists.

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;

use crate::error::Error;

/// Decides which metric names enter the detection pipeline.
///
/// A name is admitted iff it matches at least one whitelist pattern and no
/// blacklist pattern. Patterns are shell globs (`*`, `?`, character
/// classes). A malformed pattern is logged and skipped; it never matches.
#[derive(Debug)]
pub struct MetricFilter {
    whitelist: GlobSet,
    blacklist: GlobSet,
}

impl MetricFilter {
    pub fn new(whitelist: &[String], blacklist: &[String]) -> Self {
        Self {
            whitelist: compile(whitelist, "whitelist"),
            blacklist: compile(blacklist, "blacklist"),
        }
    }

    /// Whether observations named `name` should be processed at all.
    pub fn admit(&self, name: &str) -> bool {
        self.whitelist.is_match(name) && !self.blacklist.is_match(name)
    }
}

fn compile(patterns: &[String], which: &str) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => {
                let err = Error::BadPattern {
                    pattern: pattern.clone(),
                    reason: err.to_string(),
                };
                warn!("skipping {which} pattern: {err}");
            }
        }
    }
    builder.build().unwrap_or_else(|err| {
        warn!("failed to build {which} matcher: {err}");
        GlobSet::empty()
    })
}
