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

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use driftwatch_storage::DetectorConfig;

/// Driftwatch Server Configuration
///
/// Loaded from a JSON document; every field has a default so a partial (or
/// absent) file is fine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// TCP port to bind
    #[serde(default = "default_port")]
    pub port: u16,

    /// Filesystem path for the state store
    #[serde(default = "default_dbfile", alias = "dbpath")]
    pub dbfile: PathBuf,

    /// EWMA smoothing weight, must lie in (0, 1)
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// When false, incoming values are softened toward the prior mean
    #[serde(default = "default_strict")]
    pub strict: bool,

    /// `[grid_seconds, num_grids]` phase bucketing of each metric's history
    #[serde(default = "default_periodicity")]
    pub periodicity: [u32; 2],

    /// Observations a key must accumulate before scoring is enabled
    #[serde(default = "default_start_size")]
    pub start_size: i32,

    /// Glob patterns a metric must match to be admitted
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<String>,

    /// Glob patterns that exclude a metric even when whitelisted
    #[serde(default = "default_blacklist")]
    pub blacklist: Vec<String>,
}

// Default values
fn default_port() -> u16 {
    9000
}

fn default_dbfile() -> PathBuf {
    PathBuf::from("stats.db")
}

fn default_factor() -> f64 {
    0.07
}

fn default_strict() -> bool {
    true
}

fn default_periodicity() -> [u32; 2] {
    [480, 180]
}

fn default_start_size() -> i32 {
    32
}

fn default_whitelist() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_blacklist() -> Vec<String> {
    vec!["statsd.*".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            dbfile: default_dbfile(),
            factor: default_factor(),
            strict: default_strict(),
            periodicity: default_periodicity(),
            start_size: default_start_size(),
            whitelist: default_whitelist(),
            blacklist: default_blacklist(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from an optional file path, falling back to
    /// defaults when no file is given or the file does not exist.
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("loading configuration from {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if !(self.factor > 0.0 && self.factor < 1.0) {
            anyhow::bail!(
                "invalid factor {} in config: must be inside (0, 1)",
                self.factor
            );
        }
        if self.periodicity[0] < 1 || self.periodicity[1] < 1 {
            anyhow::bail!(
                "invalid periodicity {:?} in config: grid and grid count must be positive",
                self.periodicity
            );
        }
        if self.start_size < 1 {
            anyhow::bail!(
                "invalid start_size {} in config: must be at least 1",
                self.start_size
            );
        }
        Ok(())
    }

    /// The estimator parameters carried by this configuration.
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            factor: self.factor,
            strict: self.strict,
            start_size: self.start_size,
            grid: self.periodicity[0],
            num_grids: self.periodicity[1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 9000);
        assert_eq!(config.dbfile, PathBuf::from("stats.db"));
        assert_eq!(config.factor, 0.07);
        assert!(config.strict);
        assert_eq!(config.periodicity, [480, 180]);
        assert_eq!(config.start_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"port": 9100}"#).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.factor, 0.07);
        assert_eq!(config.whitelist, vec!["*".to_string()]);
        assert_eq!(config.blacklist, vec!["statsd.*".to_string()]);
    }

    #[test]
    fn test_dbpath_alias() {
        let config: ServerConfig = serde_json::from_str(r#"{"dbpath": "/var/lib/dw"}"#).unwrap();
        assert_eq!(config.dbfile, PathBuf::from("/var/lib/dw"));
    }

    #[test]
    fn test_factor_validation_names_the_field() {
        for factor in ["0.0", "1.0", "-0.5", "3.2"] {
            let config: ServerConfig =
                serde_json::from_str(&format!(r#"{{"factor": {factor}}}"#)).unwrap();
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains("factor"), "error {err:?} should name factor");
        }
    }

    #[test]
    fn test_periodicity_and_start_size_validation() {
        let mut config = ServerConfig::default();
        config.periodicity = [0, 180];
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.start_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_detector_config_mapping() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"factor": 0.1, "strict": false, "periodicity": [60, 10], "start_size": 3}"#,
        )
        .unwrap();
        let detector = config.detector_config();
        assert_eq!(detector.factor, 0.1);
        assert!(!detector.strict);
        assert_eq!(detector.grid, 60);
        assert_eq!(detector.num_grids, 10);
        assert_eq!(detector.start_size, 3);
    }
}
