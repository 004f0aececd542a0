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

//! Wire codec for the line-oriented pub/sub protocol.
//!
//! Two newline-terminated ASCII formats travel on the socket:
//!
//! - pub input: `<name> <stamp> <value>` (three fields)
//! - sub output: `<name> <stamp> <value> <anoma> <avg_old> <avg_new>`
//!   (six fields, floats at 3 decimal places)
//!
//! The first line of every connection is a control line, `pub` or `sub`.

use crate::error::{Error, Result};
use crate::stat::Stat;

/// Framing safety cap; a longer line is rejected and the connection closed.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Connection mode, fixed by the first line of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Pub,
    Sub,
}

impl Mode {
    /// Parse a control line. Surrounding whitespace is trimmed and the
    /// keyword is case-insensitive; anything else is `None`.
    pub fn parse(line: &str) -> Option<Mode> {
        match line.trim().to_lowercase().as_str() {
            "pub" => Some(Mode::Pub),
            "sub" => Some(Mode::Sub),
            _ => None,
        }
    }
}

/// Parse one publish line into a [`Stat`].
///
/// Fails on anything other than exactly three whitespace-separated fields
/// with a decimal integer stamp and a finite float value.
pub fn parse_pub_line(line: &str) -> Result<Stat> {
    let mut words = line.split_whitespace();
    let (name, stamp, value) = match (words.next(), words.next(), words.next(), words.next()) {
        (Some(name), Some(stamp), Some(value), None) => (name, stamp, value),
        _ => return Err(Error::BadStatLine(line.to_string())),
    };
    let stamp: i64 = stamp
        .parse()
        .map_err(|_| Error::BadStatLine(line.to_string()))?;
    let value: f64 = value
        .parse()
        .map_err(|_| Error::BadStatLine(line.to_string()))?;
    if !value.is_finite() {
        return Err(Error::BadStatLine(line.to_string()));
    }
    Ok(Stat::new(name, stamp, value))
}

/// Format a scored stat as one subscriber output line (no trailing newline).
pub fn format_sub_line(stat: &Stat) -> String {
    format!(
        "{} {} {:.3} {:.3} {:.3} {:.3}",
        stat.name, stat.stamp, stat.value, stat.anoma, stat.avg_old, stat.avg_new
    )
}

/// Parse one subscriber output line back into a [`Stat`].
///
/// The inverse of [`format_sub_line`]; used by subscribing clients.
pub fn parse_sub_line(line: &str) -> Result<Stat> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.len() != 6 {
        return Err(Error::BadStatLine(line.to_string()));
    }
    let bad = || Error::BadStatLine(line.to_string());
    let mut stat = Stat::new(
        words[0],
        words[1].parse().map_err(|_| bad())?,
        words[2].parse().map_err(|_| bad())?,
    );
    stat.anoma = words[3].parse().map_err(|_| bad())?;
    stat.avg_old = words[4].parse().map_err(|_| bad())?;
    stat.avg_new = words[5].parse().map_err(|_| bad())?;
    Ok(stat)
}
